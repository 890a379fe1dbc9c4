//! Tool annotations derived from HTTP method semantics (RFC 9110).

use reqwest::Method;
use rmcp::model::ToolAnnotations;

/// Build MCP annotations for an HTTP-backed tool.
///
/// Every upstream call leaves the process, so `openWorldHint` is always set. Extension methods
/// get no other hints.
#[must_use]
pub fn annotations_for(method: &Method, title: Option<&str>) -> ToolAnnotations {
    // (read_only, destructive, idempotent)
    let hints = if [Method::GET, Method::HEAD, Method::OPTIONS].contains(method) {
        (Some(true), Some(false), Some(true))
    } else if method == Method::POST {
        (Some(false), Some(false), Some(false))
    } else if method == Method::PUT || method == Method::DELETE {
        (Some(false), Some(true), Some(true))
    } else if method == Method::PATCH {
        (Some(false), Some(true), None)
    } else {
        (None, None, None)
    };

    ToolAnnotations {
        title: title.map(str::to_string),
        read_only_hint: hints.0,
        destructive_hint: hints.1,
        idempotent_hint: hints.2,
        open_world_hint: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::annotations_for;
    use reqwest::Method;

    #[test]
    fn get_is_read_only() {
        let a = annotations_for(&Method::GET, Some("List secrets"));
        assert_eq!(a.title.as_deref(), Some("List secrets"));
        assert_eq!(a.read_only_hint, Some(true));
        assert_eq!(a.destructive_hint, Some(false));
        assert_eq!(a.open_world_hint, Some(true));
    }

    #[test]
    fn delete_is_destructive_but_idempotent() {
        let a = annotations_for(&Method::DELETE, None);
        assert_eq!(a.read_only_hint, Some(false));
        assert_eq!(a.destructive_hint, Some(true));
        assert_eq!(a.idempotent_hint, Some(true));
    }

    #[test]
    fn extension_method_only_sets_open_world() {
        let custom: Method = "PROPFIND".parse().expect("valid method token");
        let a = annotations_for(&custom, None);
        assert_eq!(a.read_only_hint, None);
        assert_eq!(a.idempotent_hint, None);
        assert_eq!(a.open_world_hint, Some(true));
    }
}
