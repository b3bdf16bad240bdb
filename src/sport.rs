//! Sport-category tree.
//!
//! Categories form a hierarchy through `parent_category_id` with a
//! materialized slash-delimited `path`. The tree is handled as an arena of
//! rows keyed by id; the hierarchy view is assembled by repeated child
//! lookup so the structure stays serializable without ownership cycles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres};

use crate::error::{Result, ServerError};
use crate::team::unique_violation;

/// Cap on the independent sport-category preference path.
pub const MAX_SPORT_PREFERENCES: usize = 5;

#[derive(
    Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow,
)]
pub struct SportCategory {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub parent_category_id: Option<String>,
    /// Slash-delimited ancestry, e.g. `Ball sports/Football`.
    pub path: String,
}

/// Hierarchy view of the category tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub path: String,
    pub sub_categories: Vec<CategoryNode>,
}

#[derive(Clone)]
pub struct SportCategoryRepository {
    pool: Pool<Postgres>,
}

impl SportCategoryRepository {
    /// Create a new [`SportCategoryRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a category under an optional parent.
    pub async fn insert(
        &self,
        name: &str,
        description: Option<&str>,
        parent_category_id: Option<&str>,
    ) -> Result<SportCategory> {
        let parent = match parent_category_id {
            Some(parent_id) => Some(
                self.find_by_id(parent_id)
                    .await?
                    .ok_or(ServerError::NotFound("parent category"))?,
            ),
            None => None,
        };

        let duplicate = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (
                SELECT 1 FROM sport_categories
                WHERE name = $1 AND parent_category_id IS NOT DISTINCT FROM $2
            )"#,
        )
        .bind(name)
        .bind(parent_category_id)
        .fetch_one(&self.pool)
        .await?;
        if duplicate {
            return Err(ServerError::AlreadyExists("sport category"));
        }

        let category = SportCategory {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_owned(),
            description: description.map(str::to_owned),
            parent_category_id: parent_category_id.map(str::to_owned),
            path: match &parent {
                Some(parent) => format!("{}/{name}", parent.path),
                None => name.to_owned(),
            },
        };

        sqlx::query(
            r#"INSERT INTO sport_categories
                (id, name, description, parent_category_id, path)
                VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&category.id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.parent_category_id)
        .bind(&category.path)
        .execute(&self.pool)
        .await
        .map_err(|err| unique_violation(err, "sport category"))?;

        Ok(category)
    }

    pub async fn find_by_id(
        &self,
        id: &str,
    ) -> Result<Option<SportCategory>> {
        let category = sqlx::query_as::<_, SportCategory>(
            r#"SELECT id, name, description, parent_category_id, path
                FROM sport_categories WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(category)
    }

    /// How many of the given ids actually exist.
    pub async fn count_existing(&self, ids: &[String]) -> Result<i64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM sport_categories WHERE id = ANY($1)"#,
        )
        .bind(ids)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Rename a category and/or update its description.
    ///
    /// Renaming rewrites the materialized `path` of the node and of every
    /// descendant in the same transaction, so the tree never observes a
    /// half-renamed subtree.
    pub async fn update(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<SportCategory> {
        let mut category = self
            .find_by_id(id)
            .await?
            .ok_or(ServerError::NotFound("sport category"))?;

        let mut tx = self.pool.begin().await?;

        if let Some(name) = name.filter(|name| *name != category.name) {
            let old_path = category.path.clone();
            let new_path = match old_path.rfind('/') {
                Some(cut) => format!("{}/{name}", &old_path[..cut]),
                None => name.to_owned(),
            };

            sqlx::query(
                r#"UPDATE sport_categories SET name = $1, path = $2
                    WHERE id = $3"#,
            )
            .bind(name)
            .bind(&new_path)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            // Splice the new prefix into every descendant path. The LIKE
            // prefix must match literally, so its metacharacters are
            // escaped; SUBSTR still cuts on the raw prefix length.
            sqlx::query(
                r#"UPDATE sport_categories
                    SET path = $1 || SUBSTR(path, LENGTH($2) + 1)
                    WHERE path LIKE $3"#,
            )
            .bind(&new_path)
            .bind(&old_path)
            .bind(format!("{}/%", escape_like(&old_path)))
            .execute(&mut *tx)
            .await?;

            category.name = name.to_owned();
            category.path = new_path;
        }

        if let Some(description) = description {
            sqlx::query(
                r#"UPDATE sport_categories SET description = $1
                    WHERE id = $2"#,
            )
            .bind(description)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            category.description = Some(description.to_owned());
        }

        tx.commit().await?;
        Ok(category)
    }

    /// Delete a leaf category. Nodes with children are refused.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let has_children = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (
                SELECT 1 FROM sport_categories WHERE parent_category_id = $1
            )"#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        if has_children {
            return Err(ServerError::InvalidArgument(
                "cannot delete a category with subcategories".into(),
            ));
        }

        let result =
            sqlx::query(r#"DELETE FROM sport_categories WHERE id = $1"#)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound("sport category"));
        }

        Ok(())
    }

    /// Assemble the full hierarchy from a single arena scan.
    pub async fn hierarchy(&self) -> Result<Vec<CategoryNode>> {
        let categories = sqlx::query_as::<_, SportCategory>(
            r#"SELECT id, name, description, parent_category_id, path
                FROM sport_categories ORDER BY path"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(build_tree(categories))
    }
}

/// Escape `%`, `_` and `\` so a path can be used as a literal LIKE prefix.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Arena-based tree assembly: children are attached by repeated lookup of
/// their parent id, deepest paths first so every parent already exists.
fn build_tree(categories: Vec<SportCategory>) -> Vec<CategoryNode> {
    let mut nodes: HashMap<String, CategoryNode> = HashMap::new();
    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    let mut roots: Vec<String> = Vec::new();

    for category in &categories {
        nodes.insert(
            category.id.clone(),
            CategoryNode {
                id: category.id.clone(),
                name: category.name.clone(),
                description: category.description.clone(),
                path: category.path.clone(),
                sub_categories: Vec::new(),
            },
        );

        match &category.parent_category_id {
            Some(parent) => children_of
                .entry(parent.clone())
                .or_default()
                .push(category.id.clone()),
            None => roots.push(category.id.clone()),
        }
    }

    // Rows came ordered by path, so reversing yields leaves before parents.
    for category in categories.iter().rev() {
        if let Some(child_ids) = children_of.remove(&category.id) {
            let children: Vec<CategoryNode> = child_ids
                .into_iter()
                .filter_map(|id| nodes.remove(&id))
                .collect();
            if let Some(node) = nodes.get_mut(&category.id) {
                node.sub_categories = children;
            }
        }
    }

    roots.into_iter().filter_map(|id| nodes.remove(&id)).collect()
}
