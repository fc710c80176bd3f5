use url::Url;

use crate::error::ResolutionError;

/// Resolves an asset reference as written in a document against the page URL.
///
/// Accepts absolute, scheme-relative (`//cdn/x.js`), path-absolute (`/x.js`) and
/// path-relative (`../x.js`) references. `data:` URIs and non-http(s) schemes
/// are rejected; fragments are dropped since they never reach the server.
pub fn resolve(base_url: &Url, reference: &str) -> Result<Url, ResolutionError> {
    let reference = reference.trim();

    if is_data_uri(reference) {
        return Err(ResolutionError::DataUri);
    }

    let mut resolved = if reference.starts_with("//") {
        // Protocol-relative URL
        let with_scheme = format!("{}:{}", base_url.scheme(), reference);
        Url::parse(&with_scheme).map_err(|e| malformed(reference, e))?
    } else {
        // Absolute references parse on their own; join handles everything else
        base_url.join(reference).map_err(|e| malformed(reference, e))?
    };

    match resolved.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ResolutionError::UnsupportedScheme {
                reference: reference.to_string(),
                scheme: scheme.to_string(),
            })
        }
    }

    resolved.set_fragment(None);
    Ok(resolved)
}

/// True for `data:` URIs, ignoring case and leading whitespace.
pub fn is_data_uri(reference: &str) -> bool {
    let reference = reference.trim_start();
    reference
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
}

fn malformed(reference: &str, err: url::ParseError) -> ResolutionError {
    ResolutionError::Malformed {
        reference: reference.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/games/puzzle/index.html").unwrap()
    }

    #[test]
    fn test_absolute_reference() {
        let url = resolve(&base(), "https://cdn.example.org/lib.js").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.org/lib.js");
    }

    #[test]
    fn test_scheme_relative_reference() {
        let url = resolve(&base(), "//cdn.example.org/style.css").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.org/style.css");
    }

    #[test]
    fn test_path_absolute_reference() {
        let url = resolve(&base(), "/static/app.js").unwrap();
        assert_eq!(url.as_str(), "https://example.com/static/app.js");
    }

    #[test]
    fn test_path_relative_reference() {
        let url = resolve(&base(), "../shared/logo.png").unwrap();
        assert_eq!(url.as_str(), "https://example.com/games/shared/logo.png");

        let url = resolve(&base(), "img/a.png?v=2").unwrap();
        assert_eq!(url.as_str(), "https://example.com/games/puzzle/img/a.png?v=2");
    }

    #[test]
    fn test_fragment_is_dropped() {
        let url = resolve(&base(), "sprites.svg#icon").unwrap();
        assert_eq!(url.as_str(), "https://example.com/games/puzzle/sprites.svg");
    }

    #[test]
    fn test_data_uri_is_rejected() {
        assert_eq!(
            resolve(&base(), "data:image/png;base64,AAAA"),
            Err(ResolutionError::DataUri)
        );
        assert_eq!(
            resolve(&base(), "  DATA:text/plain,hi"),
            Err(ResolutionError::DataUri)
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = resolve(&base(), "javascript:void(0)").unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::UnsupportedScheme { ref scheme, .. } if scheme == "javascript"
        ));
    }

    #[test]
    fn test_malformed_reference() {
        let err = resolve(&base(), "http://[not-an-ip/x.js").unwrap_err();
        assert!(matches!(err, ResolutionError::Malformed { .. }));
    }
}
