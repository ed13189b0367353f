use serde::{Deserialize, Serialize};

/// Page of results returned by list endpoints. Pages are zero-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagingResponse<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub size: u32,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
}

impl<T> PagingResponse<T> {
    pub fn has_more(&self) -> bool {
        self.page + 1 < self.total_pages
    }
}
