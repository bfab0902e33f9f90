use url::Url;

use crate::error::UrlError;

/// Builds realtime endpoint URLs rooted at a configured origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsUrlBuilder {
    origin: Url,
}

impl WsUrlBuilder {
    /// `origin` may be an HTTP origin (translated to its realtime equivalent) or already a
    /// `ws`/`wss` one.
    pub fn new(origin: &str) -> Result<Self, UrlError> {
        let mut origin = Url::parse(origin)?;
        if origin.cannot_be_a_base() {
            return Err(UrlError::NotABase(origin.to_string()));
        }

        let scheme = match origin.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(UrlError::UnsupportedScheme(other.to_string())),
        };
        origin
            .set_scheme(scheme)
            .map_err(|()| UrlError::UnsupportedScheme(origin.scheme().to_string()))?;

        Ok(Self { origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Resolve `path` against the origin and append every query parameter that has a non-empty
    /// value.
    pub fn build(&self, path: &str, query: &[(&str, Option<&str>)]) -> Result<Url, UrlError> {
        let mut url = self.origin.join(path)?;

        let params: Vec<(&str, &str)> = query
            .iter()
            .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (*name, v)))
            .collect();
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }

        Ok(url)
    }

    /// `<scheme>://<host>/ws/debate/<debateId>?spectatorId=<id>`
    pub fn debate_url(&self, debate_id: &str, spectator_id: &str) -> Result<Url, UrlError> {
        let mut url = self.build("/ws/debate/", &[("spectatorId", Some(spectator_id))])?;
        url.path_segments_mut()
            .map_err(|()| UrlError::NotABase(self.origin.to_string()))?
            .pop_if_empty()
            .push(debate_id);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_translation() {
        let cases = [
            ("http://localhost:1313", "ws://localhost:1313/"),
            ("https://debate.example.com", "wss://debate.example.com/"),
            ("wss://rt.example.com", "wss://rt.example.com/"),
            ("ws://10.0.0.2:8080", "ws://10.0.0.2:8080/"),
        ];
        for (origin, expected) in cases {
            assert_eq!(WsUrlBuilder::new(origin).unwrap().origin().as_str(), expected);
        }
    }

    #[test]
    fn test_rejects_bad_origins() {
        assert!(matches!(
            WsUrlBuilder::new("not a url"),
            Err(UrlError::Parse(_))
        ));
        assert!(matches!(
            WsUrlBuilder::new("ftp://example.com"),
            Err(UrlError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(matches!(
            WsUrlBuilder::new("mailto:someone@example.com"),
            Err(UrlError::NotABase(_))
        ));
    }

    #[test]
    fn test_empty_params_are_omitted() {
        let urls = WsUrlBuilder::new("https://example.com").unwrap();
        let query = [
            ("a", Some("1")),
            ("b", None),
            ("c", Some("")),
            ("d", Some("two words")),
        ];
        let url = urls.build("/ws/x", &query).unwrap();
        assert_eq!(url.as_str(), "wss://example.com/ws/x?a=1&d=two+words");

        let url = urls.build("/ws/x", &[("b", None)]).unwrap();
        assert_eq!(url.as_str(), "wss://example.com/ws/x");
    }

    #[test]
    fn test_debate_url() {
        let urls = WsUrlBuilder::new("http://localhost:1313").unwrap();
        assert_eq!(
            urls.debate_url("abc123", "viewer-1").unwrap().as_str(),
            "ws://localhost:1313/ws/debate/abc123?spectatorId=viewer-1"
        );
        assert_eq!(
            urls.debate_url("abc123", "").unwrap().as_str(),
            "ws://localhost:1313/ws/debate/abc123"
        );
        assert_eq!(
            urls.debate_url("a/b?c", "v").unwrap().as_str(),
            "ws://localhost:1313/ws/debate/a%2Fb%3Fc?spectatorId=v"
        );
    }
}
