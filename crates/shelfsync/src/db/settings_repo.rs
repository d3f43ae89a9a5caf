//! Per-user library settings: display name, explanation toggle and an
//! optional output mode override.

use rusqlite::types::ToSql;
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw library settings row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibrarySettingsRow {
    pub user_id: String,
    pub display_name: String,
    pub include_explanations: bool,
    /// `"flat"` or `"folder_link"`; `None` uses the configured default.
    pub output_mode: Option<String>,
    pub enabled: bool,
    pub updated_at: String,
}

impl LibrarySettingsRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            display_name: row.get("display_name")?,
            include_explanations: row.get("include_explanations")?,
            output_mode: row.get("output_mode")?,
            enabled: row.get("enabled")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Columns that may be changed through [`SettingsUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsColumn {
    DisplayName,
    IncludeExplanations,
    OutputMode,
    Enabled,
}

impl SettingsColumn {
    fn name(self) -> &'static str {
        match self {
            SettingsColumn::DisplayName => "display_name",
            SettingsColumn::IncludeExplanations => "include_explanations",
            SettingsColumn::OutputMode => "output_mode",
            SettingsColumn::Enabled => "enabled",
        }
    }
}

/// Partial update of a settings row. Unset fields are left untouched.
///
/// Column names come from a closed enum, so the generated statement only
/// ever contains known identifiers; values are always bound parameters.
#[derive(Debug, Default, Clone)]
pub struct SettingsUpdate {
    pub display_name: Option<String>,
    pub include_explanations: Option<bool>,
    /// `Some(None)` clears the override.
    pub output_mode: Option<Option<String>>,
    pub enabled: Option<bool>,
}

impl SettingsUpdate {
    fn assignments(&self) -> Vec<(SettingsColumn, Box<dyn ToSql>)> {
        let mut out: Vec<(SettingsColumn, Box<dyn ToSql>)> = Vec::new();
        if let Some(ref name) = self.display_name {
            out.push((SettingsColumn::DisplayName, Box::new(name.clone())));
        }
        if let Some(flag) = self.include_explanations {
            out.push((SettingsColumn::IncludeExplanations, Box::new(flag)));
        }
        if let Some(ref mode) = self.output_mode {
            out.push((SettingsColumn::OutputMode, Box::new(mode.clone())));
        }
        if let Some(flag) = self.enabled {
            out.push((SettingsColumn::Enabled, Box::new(flag)));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.include_explanations.is_none()
            && self.output_mode.is_none()
            && self.enabled.is_none()
    }
}

/// Inserts or fully replaces a settings row.
pub fn upsert(db: &Database, row: &LibrarySettingsRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO library_settings (user_id, display_name, include_explanations,
             output_mode, enabled, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
               display_name = excluded.display_name,
               include_explanations = excluded.include_explanations,
               output_mode = excluded.output_mode,
               enabled = excluded.enabled,
               updated_at = excluded.updated_at",
            params![
                row.user_id,
                row.display_name,
                row.include_explanations,
                row.output_mode,
                row.enabled,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds settings for one user.
pub fn find(db: &Database, user_id: &str) -> Result<Option<LibrarySettingsRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM library_settings WHERE user_id = ?1")?;
        let mut rows = stmt.query_map(params![user_id], LibrarySettingsRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

fn select_rows(db: &Database, sql: &str) -> Result<Vec<LibrarySettingsRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], LibrarySettingsRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists every user, enabled or not, ordered by user id.
pub fn list(db: &Database) -> Result<Vec<LibrarySettingsRow>, DatabaseError> {
    select_rows(db, "SELECT * FROM library_settings ORDER BY user_id")
}

/// Lists enabled users ordered by user id.
pub fn list_enabled(db: &Database) -> Result<Vec<LibrarySettingsRow>, DatabaseError> {
    select_rows(
        db,
        "SELECT * FROM library_settings WHERE enabled = 1 ORDER BY user_id",
    )
}

/// Applies a partial update. Returns false when no row matched.
pub fn update(
    db: &Database,
    user_id: &str,
    changes: &SettingsUpdate,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    let assignments = changes.assignments();
    if assignments.is_empty() {
        return Ok(find(db, user_id)?.is_some());
    }

    db.with_conn(|conn| {
        let mut set_clauses = Vec::with_capacity(assignments.len() + 1);
        let mut values: Vec<Box<dyn ToSql>> = Vec::with_capacity(assignments.len() + 2);

        for (column, value) in assignments {
            values.push(value);
            set_clauses.push(format!("{} = ?{}", column.name(), values.len()));
        }
        values.push(Box::new(updated_at.to_string()));
        set_clauses.push(format!("updated_at = ?{}", values.len()));
        values.push(Box::new(user_id.to_string()));

        let sql = format!(
            "UPDATE library_settings SET {} WHERE user_id = ?{}",
            set_clauses.join(", "),
            values.len()
        );
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let changed = conn.execute(&sql, params_ref.as_slice())?;
        Ok(changed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample(user_id: &str) -> LibrarySettingsRow {
        LibrarySettingsRow {
            user_id: user_id.to_string(),
            display_name: "Alice".to_string(),
            include_explanations: false,
            output_mode: None,
            enabled: true,
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let db = test_db();
        upsert(&db, &sample("u1")).unwrap();

        let found = find(&db, "u1").unwrap().unwrap();
        assert_eq!(found.display_name, "Alice");
        assert!(found.enabled);
        assert!(find(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces() {
        let db = test_db();
        upsert(&db, &sample("u1")).unwrap();
        let mut changed = sample("u1");
        changed.display_name = "Alice B".to_string();
        changed.include_explanations = true;
        upsert(&db, &changed).unwrap();

        let found = find(&db, "u1").unwrap().unwrap();
        assert_eq!(found.display_name, "Alice B");
        assert!(found.include_explanations);
    }

    #[test]
    fn test_list_enabled_skips_disabled() {
        let db = test_db();
        upsert(&db, &sample("b")).unwrap();
        upsert(&db, &sample("a")).unwrap();
        let mut off = sample("c");
        off.enabled = false;
        upsert(&db, &off).unwrap();

        let ids: Vec<String> = list_enabled(&db).unwrap().into_iter().map(|r| r.user_id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_list_includes_disabled() {
        let db = test_db();
        upsert(&db, &sample("b")).unwrap();
        let mut off = sample("a");
        off.enabled = false;
        upsert(&db, &off).unwrap();

        let rows = list(&db).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_id, "a");
        assert!(!rows[0].enabled);
    }

    #[test]
    fn test_partial_update_touches_only_given_fields() {
        let db = test_db();
        upsert(&db, &sample("u1")).unwrap();

        let changes = SettingsUpdate {
            include_explanations: Some(true),
            output_mode: Some(Some("folder_link".to_string())),
            ..Default::default()
        };
        assert!(update(&db, "u1", &changes, "2026-02-01T00:00:00Z").unwrap());

        let found = find(&db, "u1").unwrap().unwrap();
        assert_eq!(found.display_name, "Alice");
        assert!(found.include_explanations);
        assert_eq!(found.output_mode.as_deref(), Some("folder_link"));
        assert_eq!(found.updated_at, "2026-02-01T00:00:00Z");
    }

    #[test]
    fn test_update_can_clear_override() {
        let db = test_db();
        let mut row = sample("u1");
        row.output_mode = Some("flat".to_string());
        upsert(&db, &row).unwrap();

        let changes = SettingsUpdate {
            output_mode: Some(None),
            ..Default::default()
        };
        update(&db, "u1", &changes, "2026-02-01T00:00:00Z").unwrap();
        assert!(find(&db, "u1").unwrap().unwrap().output_mode.is_none());
    }

    #[test]
    fn test_update_missing_user() {
        let db = test_db();
        let changes = SettingsUpdate {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(!update(&db, "ghost", &changes, "2026-02-01T00:00:00Z").unwrap());
        assert!(SettingsUpdate::default().is_empty());
    }
}
