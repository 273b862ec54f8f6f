use sqlx::{QueryBuilder, Row, Sqlite};

use common::protocol::{News, NewsSummary};

use super::models::{now, timestamp};
use super::{Database, StoreError};

pub const NEWS_PAGE_SIZE: i64 = 10;

impl Database {
    pub async fn post_news(
        &self,
        subject: &str,
        body: &str,
        tags: &[String],
    ) -> Result<i64, StoreError> {
        let mut tx = self.begin_write().await?;

        let id = sqlx::query("INSERT INTO news (subject, body, created_at) VALUES (?1, ?2, ?3)")
            .bind(subject)
            .bind(body)
            .bind(now())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        for tag in tags {
            sqlx::query("INSERT OR IGNORE INTO news_tag (news_id, tag) VALUES (?1, ?2)")
                .bind(id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    /// Newest first, `NEWS_PAGE_SIZE` per page. Pages start at 1.
    pub async fn news_list(
        &self,
        tags: &[String],
        page: u32,
    ) -> Result<Vec<NewsSummary>, StoreError> {
        let offset = i64::from(page.max(1) - 1) * NEWS_PAGE_SIZE;

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, subject, created_at FROM news");
        if !tags.is_empty() {
            query.push(" WHERE id IN (SELECT news_id FROM news_tag WHERE tag IN (");
            let mut separated = query.separated(", ");
            for tag in tags {
                separated.push_bind(tag);
            }
            query.push("))");
        }
        query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query.push_bind(NEWS_PAGE_SIZE);
        query.push(" OFFSET ");
        query.push_bind(offset);

        let rows = query.build().fetch_all(&**self).await?;
        rows.iter()
            .map(|row| -> Result<NewsSummary, StoreError> {
                Ok(NewsSummary {
                    id: row.try_get("id")?,
                    subject: row.try_get("subject")?,
                    created_at: timestamp(row.try_get("created_at")?),
                })
            })
            .collect()
    }

    pub async fn news(&self, id: i64) -> Result<Option<News>, StoreError> {
        let row = sqlx::query("SELECT id, subject, body, created_at FROM news WHERE id = ?1")
            .bind(id)
            .fetch_optional(&**self)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let tags = sqlx::query("SELECT tag FROM news_tag WHERE news_id = ?1 ORDER BY tag")
            .bind(id)
            .fetch_all(&**self)
            .await?
            .iter()
            .map(|r| r.try_get("tag"))
            .collect::<Result<Vec<String>, _>>()?;

        Ok(Some(News {
            id: row.try_get("id")?,
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            tags,
            created_at: timestamp(row.try_get("created_at")?),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_news_pages_and_tags() {
        let db = Database::in_memory().await.unwrap();
        for i in 0..12 {
            let tag = if i % 2 == 0 { "server" } else { "client" };
            db.post_news(&format!("item {}", i), "body", &[tag.to_string()])
                .await
                .unwrap();
        }

        let first = db.news_list(&[], 1).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(first[0].subject, "item 11");
        assert_eq!(db.news_list(&[], 2).await.unwrap().len(), 2);

        let server = db.news_list(&["server".to_string()], 1).await.unwrap();
        assert_eq!(server.len(), 6);

        let item = db.news(server[0].id).await.unwrap().unwrap();
        assert_eq!(item.tags, vec!["server".to_string()]);
        assert!(db.news(9999).await.unwrap().is_none());
    }
}
