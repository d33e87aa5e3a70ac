//! Per-site credentials and SharePoint path handling
//!
//! SharePoint addresses folders and files by *server-relative* path, which
//! includes the site path (`/sites/MyTeamSite/Shared Documents/a.pdf`). Users
//! usually think in *site-relative* paths (`/Shared Documents/a.pdf`); the
//! helpers here convert between the two and map remote paths to local ones.

use crate::error::{Error, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;
use std::path::{Path, PathBuf};

/// Characters escaped inside an OData string literal placed in a URL path.
const ODATA_LITERAL: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// App-only credentials for exactly one SharePoint site.
#[derive(Clone, PartialEq, Eq)]
pub struct SiteCredentials {
    host: String,
    site_path: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl SiteCredentials {
    /// Create credentials for `host` (e.g. `contoso.sharepoint.com`) and
    /// `site_path` (e.g. `/sites/MyTeamSite`).
    pub fn new(
        host: impl Into<String>,
        site_path: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        let host = normalize_host(&host.into());
        let site_path = normalize_site_path(&site_path.into());
        let tenant_id = tenant_id.into().trim().to_string();
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into();

        for (field, value) in [
            ("host", host.as_str()),
            ("tenant_id", tenant_id.as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ] {
            if value.is_empty() {
                return Err(Error::InvalidInput(format!("{} cannot be empty", field)));
            }
        }

        if host.contains('/') {
            return Err(Error::InvalidInput(format!(
                "host must not contain a path: {}",
                host
            )));
        }

        Ok(Self {
            host,
            site_path,
            tenant_id,
            client_id,
            client_secret,
        })
    }

    /// Create credentials from a full site URL such as
    /// `https://contoso.sharepoint.com/sites/MyTeamSite`.
    pub fn from_site_url(
        site_url: &str,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        let url = url::Url::parse(site_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid site URL '{}': {}", site_url, e)))?;

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidInput(format!("Site URL has no host: {}", site_url)))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let site_path = percent_encoding::percent_decode_str(url.path())
            .decode_utf8()
            .map_err(|e| Error::InvalidInput(format!("Invalid site path: {}", e)))?
            .into_owned();

        Self::new(host, site_path, tenant_id, client_id, client_secret)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Site path with a leading slash, empty for the root site collection.
    pub fn site_path(&self) -> &str {
        &self.site_path
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// `https://{host}{site_path}`
    pub fn site_url(&self) -> String {
        format!("https://{}{}", self.host, self.site_path)
    }

    /// REST endpoint below the site, e.g. `api_url("web/folders")`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/_api/{}", self.site_url(), path.trim_start_matches('/'))
    }

    /// Turn a site-relative or server-relative path into a server-relative one.
    pub fn resolve_path(&self, path: &str) -> String {
        let path = normalize_path(path);
        if self.site_path.is_empty() || strip_path_prefix(&path, &self.site_path).is_some() {
            return path;
        }
        if path == "/" {
            return self.site_path.clone();
        }
        format!("{}{}", self.site_path, path)
    }

    /// The part of a server-relative path below the site, without leading slash.
    pub fn site_relative<'a>(&self, server_relative: &'a str) -> Option<&'a str> {
        if self.site_path.is_empty() {
            return Some(server_relative.trim_start_matches('/'));
        }
        strip_path_prefix(server_relative, &self.site_path).map(|rest| rest.trim_start_matches('/'))
    }

    /// Whether a server-relative path lives inside this site.
    pub fn contains(&self, server_relative: &str) -> bool {
        self.site_relative(server_relative).is_some()
    }
}

impl fmt::Debug for SiteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteCredentials")
            .field("host", &self.host)
            .field("site_path", &self.site_path)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    host.trim_end_matches('/').to_ascii_lowercase()
}

fn normalize_site_path(path: &str) -> String {
    let path = normalize_path(path);
    if path == "/" {
        String::new()
    } else {
        path
    }
}

/// Forward slashes, one leading slash, no duplicate or trailing slashes.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .trim()
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Case-insensitive prefix match on whole path segments.
pub(crate) fn strip_path_prefix<'a>(path: &'a str, site_path: &str) -> Option<&'a str> {
    let head = path.get(..site_path.len())?;
    if !head.eq_ignore_ascii_case(site_path) {
        return None;
    }
    let rest = &path[site_path.len()..];
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Quote a server-relative path for `GetFolderByServerRelativeUrl('...')`.
pub fn odata_literal(path: &str) -> String {
    let escaped = path.replace('\'', "''");
    utf8_percent_encode(&escaped, ODATA_LITERAL).to_string()
}

/// Last segment of a server-relative path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a relative remote path below a local root, refusing anything that
/// would escape it.
pub fn local_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    let mut pushed = false;
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." || segment.contains('\\') || segment.contains('\0') {
            return Err(Error::InvalidInput(format!(
                "Refusing unsafe remote path segment '{}' in '{}'",
                segment, relative
            )));
        }
        path.push(segment);
        pushed = true;
    }
    if !pushed {
        return Err(Error::InvalidInput(format!(
            "Remote path '{}' has no file name",
            relative
        )));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team_site() -> SiteCredentials {
        SiteCredentials::new(
            "https://contoso.sharepoint.com/",
            "sites/MyTeamSite/",
            "tenant",
            "client",
            "secret",
        )
        .unwrap()
    }

    #[test]
    fn test_normalization() {
        let site = team_site();
        assert_eq!(site.host(), "contoso.sharepoint.com");
        assert_eq!(site.site_path(), "/sites/MyTeamSite");
        assert_eq!(site.site_url(), "https://contoso.sharepoint.com/sites/MyTeamSite");
        assert_eq!(
            site.api_url("/web/folders"),
            "https://contoso.sharepoint.com/sites/MyTeamSite/_api/web/folders"
        );
    }

    #[test]
    fn test_from_site_url() {
        let site = SiteCredentials::from_site_url(
            "https://contoso.sharepoint.com/sites/My%20Team",
            "tenant",
            "client",
            "secret",
        )
        .unwrap();
        assert_eq!(site.host(), "contoso.sharepoint.com");
        assert_eq!(site.site_path(), "/sites/My Team");

        let root = SiteCredentials::from_site_url("https://contoso.sharepoint.com", "t", "c", "s")
            .unwrap();
        assert_eq!(root.site_path(), "");
        assert_eq!(root.resolve_path("/Shared Documents"), "/Shared Documents");
    }

    #[test]
    fn test_empty_fields_rejected() {
        assert!(SiteCredentials::new("", "/sites/a", "t", "c", "s").is_err());
        assert!(SiteCredentials::new("h", "/sites/a", "t", "c", "").is_err());
        assert!(SiteCredentials::new("h/extra", "/sites/a", "t", "c", "s").is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let printed = format!("{:?}", team_site());
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("\"secret\""));
    }

    #[test]
    fn test_resolve_path() {
        let site = team_site();
        assert_eq!(
            site.resolve_path("/Shared Documents/Reports/"),
            "/sites/MyTeamSite/Shared Documents/Reports"
        );
        assert_eq!(
            site.resolve_path("Shared Documents\\Reports"),
            "/sites/MyTeamSite/Shared Documents/Reports"
        );
        assert_eq!(
            site.resolve_path("/sites/myteamsite/Shared Documents"),
            "/sites/myteamsite/Shared Documents"
        );
        assert_eq!(site.resolve_path("/"), "/sites/MyTeamSite");
        // A sibling site with a longer name is not treated as inside this site
        assert_eq!(
            site.resolve_path("/sites/MyTeamSite2/Docs"),
            "/sites/MyTeamSite/sites/MyTeamSite2/Docs"
        );
    }

    #[test]
    fn test_site_relative() {
        let site = team_site();
        assert_eq!(
            site.site_relative("/sites/MyTeamSite/Shared Documents/a.pdf"),
            Some("Shared Documents/a.pdf")
        );
        assert_eq!(site.site_relative("/sites/Other/a.pdf"), None);
        assert!(!site.contains("/sites/MyTeamSiteX/a.pdf"));
    }

    #[test]
    fn test_odata_literal() {
        assert_eq!(
            odata_literal("/sites/A/Shared Documents/O'Brien #1.pdf"),
            "/sites/A/Shared%20Documents/O''Brien%20%231.pdf"
        );
    }

    #[test]
    fn test_local_path() {
        let root = Path::new("/out");
        assert_eq!(
            local_path(root, "Shared Documents/Reports/a.pdf").unwrap(),
            PathBuf::from("/out/Shared Documents/Reports/a.pdf")
        );
        assert!(local_path(root, "../etc/passwd").is_err());
        assert!(local_path(root, "").is_err());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/sites/A/Docs/b.pdf"), "b.pdf");
        assert_eq!(file_name("b.pdf"), "b.pdf");
    }
}
