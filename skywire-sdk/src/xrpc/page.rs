use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{RequestError, Result};

/// One page of a cursor-paginated list.
///
/// A missing cursor means this was the last page. Fetching the next page is
/// the caller's decision; nothing is aggregated automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items in server order.
    pub items: Vec<T>,
    /// Cursor for the next page.
    pub cursor: Option<String>,
}

impl<T> Page<T> {
    /// True when no further page exists.
    pub fn is_last(&self) -> bool {
        self.cursor.is_none()
    }
}

impl<T: DeserializeOwned> Page<T> {
    /// Decode `{ "<items_field>": [..], "cursor": ".." }`.
    ///
    /// An empty cursor string is treated as absent.
    pub(crate) fn from_body(body: &[u8], items_field: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_slice(body).map_err(decode)?;
        let items = match value.get_mut(items_field).map(Value::take) {
            Some(items @ Value::Array(_)) => serde_json::from_value(items).map_err(decode)?,
            Some(_) | None => {
                return Err(RequestError::DecodeJson {
                    message: format!("response has no `{items_field}` array"),
                }
                .into());
            }
        };
        let cursor = value
            .get("cursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        Ok(Page { items, cursor })
    }
}

fn decode(error: serde_json::Error) -> crate::Error {
    RequestError::DecodeJson {
        message: error.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_items_and_cursor() {
        let page: Page<String> =
            Page::from_body(br#"{"feeds":["a","b"],"cursor":"next"}"#, "feeds").unwrap();
        assert_eq!(page.items, vec!["a", "b"]);
        assert_eq!(page.cursor.as_deref(), Some("next"));
        assert!(!page.is_last());
    }

    #[test]
    fn missing_or_empty_cursor_ends_pagination() {
        let page: Page<u32> = Page::from_body(br#"{"items":[1],"cursor":""}"#, "items").unwrap();
        assert!(page.is_last());
        let page: Page<u32> = Page::from_body(br#"{"items":[]}"#, "items").unwrap();
        assert!(page.is_last());
    }

    #[test]
    fn missing_items_is_protocol_error() {
        let err = Page::<u32>::from_body(br#"{"cursor":"x"}"#, "items").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
    }
}
