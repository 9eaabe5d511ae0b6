//! Call-scoped configuration.
//!
//! A client holds a default for each setting; an individual call may
//! override it by storing a [`RequestConfig`] in the [`Extensions`] of its
//! [`Outgoing`](crate::Outgoing) request, typically from a request filter.
//! Lookups prefer the call's value and fall back to the client's.
//!
//! Each setting is keyed by a marker type implementing
//! [`RequestConfigValue`], so two settings sharing a value type (two
//! `Duration`s, say) never collide in the extensions map.

use std::any::type_name;
use std::fmt::Debug;
use std::time::Duration;

use http::Extensions;

/// Associates a configuration key type with its value type.
pub(crate) trait RequestConfigValue: Copy + Clone + 'static {
    type Value: Clone + Debug + Send + Sync + 'static;
}

/// RequestConfig carries one configuration value, either client-wide or
/// for a single call.
#[derive(Clone, Copy)]
pub(crate) struct RequestConfig<T: RequestConfigValue>(Option<T::Value>);

impl<T: RequestConfigValue> Default for RequestConfig<T> {
    fn default() -> Self {
        RequestConfig(None)
    }
}

impl<T> RequestConfig<T>
where
    T: RequestConfigValue,
{
    pub(crate) fn new(v: Option<T::Value>) -> Self {
        RequestConfig(v)
    }

    /// Format the value as a struct field, without exposing it.
    pub(crate) fn fmt_as_field(&self, f: &mut std::fmt::DebugStruct<'_, '_>) {
        if let Some(v) = &self.0 {
            f.field(type_name::<T>(), v);
        }
    }

    /// The call's value if it set one, otherwise this (client) value.
    pub(crate) fn fetch<'client, 'request>(
        &'client self,
        ext: &'request Extensions,
    ) -> Option<&'request T::Value>
    where
        'client: 'request,
    {
        ext.get::<RequestConfig<T>>()
            .and_then(|v| v.0.as_ref())
            .or(self.0.as_ref())
    }

    /// Retrieve the value from a call's extensions.
    pub(crate) fn get(ext: &Extensions) -> Option<&T::Value> {
        ext.get::<RequestConfig<T>>().and_then(|v| v.0.as_ref())
    }

    /// Retrieve the mutable value from a call's extensions.
    pub(crate) fn get_mut(ext: &mut Extensions) -> &mut Option<T::Value> {
        let cfg = ext.get_or_insert_default::<RequestConfig<T>>();
        &mut cfg.0
    }
}

/// Total time allowed for sending a call and receiving its reply body.
#[derive(Clone, Copy)]
pub(crate) struct TotalTimeout;

impl RequestConfigValue for TotalTimeout {
    type Value = Duration;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_value_overrides_client_value() {
        let client = RequestConfig::<TotalTimeout>::new(Some(Duration::from_secs(30)));
        let mut ext = Extensions::new();
        assert_eq!(client.fetch(&ext), Some(&Duration::from_secs(30)));

        *RequestConfig::<TotalTimeout>::get_mut(&mut ext) = Some(Duration::from_millis(5));
        assert_eq!(client.fetch(&ext), Some(&Duration::from_millis(5)));
        assert_eq!(
            RequestConfig::<TotalTimeout>::get(&ext),
            Some(&Duration::from_millis(5))
        );
    }

    #[test]
    fn unset_everywhere() {
        let client = RequestConfig::<TotalTimeout>::default();
        assert_eq!(client.fetch(&Extensions::new()), None);
    }
}
