//! Teams and the derived sport projection.

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres};

use crate::error::{Result, ServerError};

/// A user may follow at most this many teams.
pub const MAX_SELECTED_TEAMS: usize = 3;

/// Read-mostly reference entity.
#[derive(
    Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow,
)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub sport_category_id: String,
    pub location: Option<String>,
}

/// Sport categories implied by a team selection: the deduplicated union of
/// each team's category, in first-seen order. This is the only way
/// `selected_sports` may be produced when teams are the source.
pub fn derived_sports(teams: &[Team]) -> Vec<String> {
    let mut sports: Vec<String> = Vec::with_capacity(teams.len());
    for team in teams {
        if !sports.contains(&team.sport_category_id) {
            sports.push(team.sport_category_id.clone());
        }
    }
    sports
}

#[derive(Clone)]
pub struct TeamRepository {
    pool: Pool<Postgres>,
}

impl TeamRepository {
    /// Create a new [`TeamRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a team. Name is unique within its sport category.
    pub async fn insert(
        &self,
        name: &str,
        sport_category_id: &str,
        location: Option<&str>,
    ) -> Result<Team> {
        let category_known = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM sport_categories WHERE id = $1)"#,
        )
        .bind(sport_category_id)
        .fetch_one(&self.pool)
        .await?;
        if !category_known {
            return Err(ServerError::NotFound("sport category"));
        }

        let team = Team {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_owned(),
            sport_category_id: sport_category_id.to_owned(),
            location: location.map(str::to_owned),
        };

        sqlx::query(
            r#"INSERT INTO teams (id, name, sport_category_id, location)
                VALUES ($1, $2, $3, $4)"#,
        )
        .bind(&team.id)
        .bind(&team.name)
        .bind(&team.sport_category_id)
        .bind(&team.location)
        .execute(&self.pool)
        .await
        .map_err(|err| unique_violation(err, "team"))?;

        Ok(team)
    }

    /// Resolve a set of team ids. Absent ids are silently missing from the
    /// result; callers compare counts to detect invalid input.
    pub async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Team>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let teams = sqlx::query_as::<_, Team>(
            r#"SELECT id, name, sport_category_id, location
                FROM teams WHERE id = ANY($1)"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(teams)
    }

    /// Teams registered under a sport category.
    pub async fn find_by_category(
        &self,
        sport_category_id: &str,
    ) -> Result<Vec<Team>> {
        let teams = sqlx::query_as::<_, Team>(
            r#"SELECT id, name, sport_category_id, location
                FROM teams WHERE sport_category_id = $1 ORDER BY name"#,
        )
        .bind(sport_category_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(teams)
    }
}

pub(crate) fn unique_violation(
    err: sqlx::Error,
    subject: &'static str,
) -> ServerError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            ServerError::AlreadyExists(subject)
        },
        _ => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(id: &str, sport: &str) -> Team {
        Team {
            id: id.to_owned(),
            name: id.to_owned(),
            sport_category_id: sport.to_owned(),
            location: None,
        }
    }

    #[test]
    fn test_derived_sports_deduplicates() {
        let teams =
            [team("T1", "S1"), team("T2", "S2"), team("T3", "S1")];
        assert_eq!(derived_sports(&teams), vec!["S1", "S2"]);
    }

    #[test]
    fn test_derived_sports_of_empty_selection() {
        assert!(derived_sports(&[]).is_empty());
    }
}
