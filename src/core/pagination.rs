use crate::core::{ContinuationToken, Page, SourceStore};
use crate::utils::error::{EtlError, Result};

/// Walks a source table page by page until a page arrives without a token.
///
/// Store errors are not retried; the last good token is kept so the caller can
/// resume later.
pub struct PaginationDriver<'a, S: SourceStore + ?Sized> {
    source: &'a S,
    page_size: usize,
    token: Option<ContinuationToken>,
    pages_read: usize,
    exhausted: bool,
}

impl<'a, S: SourceStore + ?Sized> PaginationDriver<'a, S> {
    pub fn new(source: &'a S, page_size: usize) -> Self {
        Self {
            source,
            page_size,
            token: None,
            pages_read: 0,
            exhausted: false,
        }
    }

    pub fn resume_from(mut self, token: Option<ContinuationToken>) -> Self {
        self.token = token;
        self
    }

    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .source
            .scan_page(self.page_size, self.token.clone())
            .await
            .map_err(|source| EtlError::SourceRead {
                pages_processed: self.pages_read,
                resume_token: self.token.clone(),
                source,
            })?;

        self.pages_read += 1;
        tracing::debug!(
            page = self.pages_read,
            records = page.records.len(),
            more = page.next_token.is_some(),
            "🔍 Scanned page"
        );

        match &page.next_token {
            Some(token) => self.token = Some(token.clone()),
            None => self.exhausted = true,
        }

        Ok(Some(page))
    }

    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    /// Token to pass to [`resume_from`](Self::resume_from) to continue after the last page read.
    pub fn resume_token(&self) -> Option<&ContinuationToken> {
        self.token.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
