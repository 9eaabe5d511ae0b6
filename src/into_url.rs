use url::Url;

/// A trait to try to convert some type into a base `Url`.
///
/// This trait is "sealed", such that only types within service-client can
/// implement it.
pub trait IntoUrl: IntoUrlSealed {}

impl IntoUrl for Url {}
impl IntoUrl for String {}
impl<'a> IntoUrl for &'a str {}
impl<'a> IntoUrl for &'a String {}

pub trait IntoUrlSealed {
    // Besides parsing as a valid `Url`, the `Url` must be a valid
    // `http::Uri`, in that it makes sense to use in a network request.
    fn into_url(self) -> crate::Result<Url>;
}

impl IntoUrlSealed for Url {
    fn into_url(self) -> crate::Result<Url> {
        if !matches!(self.scheme(), "http" | "https") {
            return Err(crate::error::builder(BadScheme).with_url(self));
        }
        if self.has_host() {
            Ok(self)
        } else {
            Err(crate::error::builder(NoHost).with_url(self))
        }
    }
}

impl<'a> IntoUrlSealed for &'a str {
    fn into_url(self) -> crate::Result<Url> {
        Url::parse(self).map_err(crate::error::builder)?.into_url()
    }
}

impl<'a> IntoUrlSealed for &'a String {
    fn into_url(self) -> crate::Result<Url> {
        (&**self).into_url()
    }
}

impl IntoUrlSealed for String {
    fn into_url(self) -> crate::Result<Url> {
        (&*self).into_url()
    }
}

/// Normalizes a base address so that relative paths append to it.
///
/// The query and fragment are dropped, and the path always ends in `/`.
pub(crate) fn base<U: IntoUrl>(url: U) -> crate::Result<Url> {
    let mut url = url.into_url()?;
    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Appends a relative path (which may carry a query) to a normalized base.
pub(crate) fn join(base: &Url, path: &str) -> crate::Result<Url> {
    let joined = format!("{}{}", base.as_str(), path.trim_start_matches('/'));
    Url::parse(&joined).map_err(|e| crate::error::builder(e).with_url(base.clone()))
}

pub(crate) fn try_uri(url: &Url) -> crate::Result<http::Uri> {
    url.as_str()
        .parse()
        .map_err(|e| crate::error::builder(e).with_url(url.clone()))
}

#[derive(Debug)]
struct BadScheme;

impl std::fmt::Display for BadScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("URL scheme is not allowed")
    }
}

impl std::error::Error for BadScheme {}

#[derive(Debug)]
struct NoHost;

impl std::fmt::Display for NoHost {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("URL has no host")
    }
}

impl std::error::Error for NoHost {}
