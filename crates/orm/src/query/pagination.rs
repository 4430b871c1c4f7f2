//! Query Builder pagination operations

use crate::error::OrmResult;
use crate::model::Model;

use super::builder::Query;
use super::types::Page;

impl Query {
    /// Add LIMIT clause
    pub fn limit(&self, count: i64) -> Query {
        self.derive(|c| c.limit = Some(count))
    }

    /// Add OFFSET clause
    pub fn offset(&self, count: i64) -> Query {
        self.derive(|c| c.offset = Some(count))
    }

    /// Add pagination (LIMIT + OFFSET); pages start at 1
    pub fn for_page(&self, page: i64, per_page: i64) -> Query {
        let page = page.max(1);
        let per_page = per_page.max(1);
        self.limit(per_page).offset((page - 1) * per_page)
    }

    /// Count the full result set, then fetch one page of it
    pub async fn paginate<M: Model>(&self, page: i64, per_page: i64) -> OrmResult<Page<M>> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let total = self.count::<M>().await?;
        let items = self.for_page(page, per_page).get::<M>().await?;
        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }
}
