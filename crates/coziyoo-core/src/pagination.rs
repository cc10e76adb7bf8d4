//! Pagination contracts.
//!
//! Offset mode serves admin/list pages: `page`, `pageSize` (max 100), a
//! per-endpoint `sortBy` allowlist, and the stable tie-break
//! `createdAt DESC, id DESC`. Cursor mode serves feeds with opaque cursors
//! over `(created_at, id)`.

use crate::error::{CoreError, ErrorCode};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_FEED_LIMIT: i64 = 100;
pub const DEFAULT_FEED_LIMIT: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
}

/// A validated offset request. `sort_by` is guaranteed to come from the
/// endpoint's allowlist, so it may be interpolated into SQL.
#[derive(Debug, Clone)]
pub struct OffsetPage {
    pub page: i64,
    pub page_size: i64,
    pub sort_by: &'static str,
    pub sort_dir: SortDir,
}

impl OffsetPage {
    pub fn parse(query: &OffsetQuery, allowed_sorts: &[&'static str]) -> Result<Self, CoreError> {
        let page = query.page.unwrap_or(1);
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page < 1 || page_size < 1 || page_size > MAX_PAGE_SIZE {
            return Err(CoreError::domain(
                ErrorCode::PaginationInvalid,
                format!("page must be >= 1 and pageSize within [1, {MAX_PAGE_SIZE}]"),
            ));
        }

        let sort_by = match &query.sort_by {
            None => allowed_sorts.first().copied().ok_or_else(|| {
                CoreError::domain(ErrorCode::Internal, "endpoint declares no sortable fields")
            })?,
            Some(requested) => allowed_sorts
                .iter()
                .copied()
                .find(|candidate| *candidate == requested)
                .ok_or_else(|| {
                    CoreError::domain(
                        ErrorCode::SortFieldInvalid,
                        format!("'{requested}' is not a sortable field here"),
                    )
                })?,
        };

        let sort_dir = match query.sort_dir.as_deref() {
            None | Some("desc") => SortDir::Desc,
            Some("asc") => SortDir::Asc,
            Some(other) => {
                return Err(CoreError::domain(
                    ErrorCode::PaginationInvalid,
                    format!("sortDir '{other}' must be asc or desc"),
                ))
            }
        };

        Ok(Self {
            page,
            page_size,
            sort_by,
            sort_dir,
        })
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    /// `ORDER BY <sort> <dir>, created_at DESC, id DESC` — the stable
    /// tie-break keeps rows from drifting between pages.
    pub fn order_clause(&self) -> String {
        format!(
            "ORDER BY {} {}, created_at DESC, id DESC",
            self.sort_by,
            self.sort_dir.as_sql()
        )
    }

    pub fn meta(&self, total: i64) -> OffsetMeta {
        OffsetMeta {
            page: self.page,
            page_size: self.page_size,
            total,
            total_pages: if total == 0 {
                0
            } else {
                (total + self.page_size - 1) / self.page_size
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OffsetMeta {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

/// Keyset cursor over `(created_at, id)`, hex-encoded so clients treat it as
/// opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn encode(&self) -> String {
        hex::encode(format!("{}|{}", self.created_at.timestamp_micros(), self.id))
    }

    pub fn decode(token: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::domain(ErrorCode::CursorInvalid, "cursor is not valid");
        let bytes = hex::decode(token.trim()).map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (micros, id) = text.split_once('|').ok_or_else(invalid)?;
        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let created_at = Utc
            .timestamp_micros(micros)
            .single()
            .ok_or_else(invalid)?;
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;
        Ok(Self { created_at, id })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FeedPage {
    pub limit: i64,
    pub after: Option<Cursor>,
}

impl FeedPage {
    pub fn parse(query: &CursorQuery) -> Result<Self, CoreError> {
        let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT);
        if limit < 1 || limit > MAX_FEED_LIMIT {
            return Err(CoreError::domain(
                ErrorCode::PaginationInvalid,
                format!("limit must be within [1, {MAX_FEED_LIMIT}]"),
            ));
        }
        let after = query
            .cursor
            .as_deref()
            .map(Cursor::decode)
            .transpose()?;
        Ok(Self { limit, after })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedMeta {
    pub limit: i64,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Build feed metadata from one-extra-row probing: fetch `limit + 1` rows,
/// hand the overflow row's key back as the next cursor.
pub fn feed_meta(limit: i64, rows_fetched: usize, last_visible: Option<Cursor>) -> FeedMeta {
    let has_more = rows_fetched as i64 > limit;
    FeedMeta {
        limit,
        next_cursor: if has_more {
            last_visible.map(|cursor| cursor.encode())
        } else {
            None
        },
        has_more,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<i64>, page_size: Option<i64>, sort_by: Option<&str>) -> OffsetQuery {
        OffsetQuery {
            page,
            page_size,
            sort_by: sort_by.map(str::to_string),
            sort_dir: None,
        }
    }

    #[test]
    fn offset_defaults_and_math() {
        let page = OffsetPage::parse(&query(None, None, None), &["created_at"]).unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset(), 0);
        assert_eq!(page.meta(45).total_pages, 3);
        assert_eq!(page.meta(0).total_pages, 0);
    }

    #[test]
    fn oversized_page_is_rejected() {
        let err = OffsetPage::parse(&query(Some(1), Some(101), None), &["created_at"]).unwrap_err();
        assert_eq!(err.code().as_str(), "PAGINATION_INVALID");
    }

    #[test]
    fn sort_field_must_be_allowlisted() {
        let err = OffsetPage::parse(
            &query(None, None, Some("password_hash")),
            &["created_at", "total_price"],
        )
        .unwrap_err();
        assert_eq!(err.code().as_str(), "SORT_FIELD_INVALID");

        let ok = OffsetPage::parse(&query(None, None, Some("total_price")), &["created_at", "total_price"])
            .unwrap();
        assert_eq!(ok.sort_by, "total_price");
        assert!(ok.order_clause().ends_with("created_at DESC, id DESC"));
    }

    #[test]
    fn cursor_roundtrip() {
        let cursor = Cursor {
            created_at: Utc.timestamp_micros(1_722_500_000_123_456).single().unwrap(),
            id: Uuid::new_v4(),
        };
        let token = cursor.encode();
        assert_eq!(Cursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn garbage_cursor_is_rejected() {
        let hex_but_wrong = hex::encode("1|not-a-uuid");
        for bad in ["zzz", "", "deadbeef", hex_but_wrong.as_str()] {
            let err = Cursor::decode(bad).unwrap_err();
            assert_eq!(err.code().as_str(), "CURSOR_INVALID", "input {bad:?}");
        }
    }

    #[test]
    fn feed_meta_signals_more_only_on_overflow() {
        let cursor = Cursor {
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        };
        let meta = feed_meta(30, 31, Some(cursor));
        assert!(meta.has_more);
        assert!(meta.next_cursor.is_some());

        let meta = feed_meta(30, 12, Some(cursor));
        assert!(!meta.has_more);
        assert!(meta.next_cursor.is_none());
    }
}
