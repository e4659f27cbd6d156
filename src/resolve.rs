use crate::age::{self, AgeCategory};
use crate::mapping::StudentRowInput;
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SportRef {
    pub id: String,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub has_distances: bool,
    pub has_sub_types: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedRefs {
    pub sport_id: String,
    pub distance_id: Option<String>,
    pub sport_sub_type_id: Option<String>,
    pub age_category_id: Option<String>,
}

#[derive(Debug)]
pub struct Resolution {
    pub refs: Option<ResolvedRefs>,
    pub errors: Vec<String>,
}

/// Read-through reference lookups with per-batch caches, so a hundred rows
/// naming the same sport hit the store once. One resolver is built per
/// upload; nothing is shared across requests.
pub struct Resolver<'c> {
    conn: &'c Connection,
    today: NaiveDate,
    sports: HashMap<String, Option<SportRef>>,
    distances: HashMap<(String, String), Option<String>>,
    sub_types: HashMap<(String, String), Option<String>>,
    age_categories: Option<Vec<AgeCategory>>,
}

impl<'c> Resolver<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Resolver {
            conn,
            today: Local::now().date_naive(),
            sports: HashMap::new(),
            distances: HashMap::new(),
            sub_types: HashMap::new(),
            age_categories: None,
        }
    }

    /// Resolve sport, conditional distance/sub-type, and age category for a
    /// row that already passed validation. `dob` is the validated birth
    /// date. Row-level problems land in `errors`; only store failures
    /// propagate as Err.
    pub fn resolve_row(
        &mut self,
        row: &StudentRowInput,
        dob: NaiveDate,
    ) -> anyhow::Result<Resolution> {
        let mut errors: Vec<String> = Vec::new();

        let Some(sport) = self.sport(&row.sport)? else {
            return Ok(Resolution {
                refs: None,
                errors: vec![format!("Sport not found: {}", row.sport.trim())],
            });
        };

        // The distance/sub-type requirements are driven by the sport's own
        // child collections, never by the sport's name.
        let mut distance_id: Option<String> = None;
        let distance_value = row.distance.trim();
        if sport.has_distances {
            if distance_value.is_empty() {
                errors.push(format!("Distance is required for sport {}", sport.name));
            } else {
                match self.distance(&sport.id, distance_value)? {
                    Some(id) => distance_id = Some(id),
                    None => errors.push(format!(
                        "Distance not found for sport {}: {}",
                        sport.name, distance_value
                    )),
                }
            }
        } else if !distance_value.is_empty() {
            errors.push(format!("Sport {} does not require distances", sport.name));
        }

        let mut sub_type_id: Option<String> = None;
        let sub_type_value = row.sport_sub_type.trim();
        if sport.has_sub_types {
            if sub_type_value.is_empty() {
                errors.push(format!(
                    "Sport sub type is required for sport {}",
                    sport.name
                ));
            } else {
                match self.sub_type(&sport.id, sub_type_value)? {
                    Some(id) => sub_type_id = Some(id),
                    None => errors.push(format!(
                        "Sport sub type not found for sport {}: {}",
                        sport.name, sub_type_value
                    )),
                }
            }
        } else if !sub_type_value.is_empty() {
            errors.push(format!("Sport {} does not require sub types", sport.name));
        }

        let event_date = sport.start_date.unwrap_or(self.today);
        let computed_age = age::age_on(dob, event_date);
        let categories = self.age_categories()?;
        let age_category_id = match age::pick_age_category(categories, computed_age) {
            Some(cat) => Some(cat.id.clone()),
            None => {
                errors.push("No age categories configured".to_string());
                None
            }
        };

        if errors.is_empty() {
            Ok(Resolution {
                refs: Some(ResolvedRefs {
                    sport_id: sport.id,
                    distance_id,
                    sport_sub_type_id: sub_type_id,
                    age_category_id,
                }),
                errors,
            })
        } else {
            Ok(Resolution { refs: None, errors })
        }
    }

    fn sport(&mut self, value: &str) -> anyhow::Result<Option<SportRef>> {
        let key = value.trim().to_lowercase();
        if let Some(cached) = self.sports.get(&key) {
            return Ok(cached.clone());
        }
        let found = self.lookup_sport(value.trim())?;
        self.sports.insert(key, found.clone());
        Ok(found)
    }

    fn lookup_sport(&self, value: &str) -> anyhow::Result<Option<SportRef>> {
        let base = if Uuid::parse_str(value).is_ok() {
            self.conn
                .query_row(
                    "SELECT id, name, start_date FROM sports WHERE id = ?",
                    [value],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()?
        } else {
            // Name matches skip soft-hidden sports; direct ids do not.
            self.conn
                .query_row(
                    "SELECT id, name, start_date FROM sports
                     WHERE name = ? COLLATE NOCASE AND hidden = 0",
                    [value],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()?
        };

        let Some((id, name, start_date_raw)) = base else {
            return Ok(None);
        };

        let has_distances: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM distances WHERE sport_id = ?",
            [&id],
            |r| r.get(0),
        )?;
        let has_sub_types: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sport_sub_types WHERE sport_id = ?",
            [&id],
            |r| r.get(0),
        )?;
        let start_date = start_date_raw
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

        Ok(Some(SportRef {
            id,
            name,
            start_date,
            has_distances: has_distances > 0,
            has_sub_types: has_sub_types > 0,
        }))
    }

    fn distance(&mut self, sport_id: &str, value: &str) -> anyhow::Result<Option<String>> {
        let key = (sport_id.to_string(), value.to_lowercase());
        if let Some(cached) = self.distances.get(&key) {
            return Ok(cached.clone());
        }
        let found = self.lookup_child("distances", sport_id, value)?;
        self.distances.insert(key, found.clone());
        Ok(found)
    }

    fn sub_type(&mut self, sport_id: &str, value: &str) -> anyhow::Result<Option<String>> {
        let key = (sport_id.to_string(), value.to_lowercase());
        if let Some(cached) = self.sub_types.get(&key) {
            return Ok(cached.clone());
        }
        let found = self.lookup_child("sport_sub_types", sport_id, value)?;
        self.sub_types.insert(key, found.clone());
        Ok(found)
    }

    fn lookup_child(
        &self,
        table: &str,
        sport_id: &str,
        value: &str,
    ) -> anyhow::Result<Option<String>> {
        let by_id = Uuid::parse_str(value).is_ok();
        let sql = if by_id {
            format!("SELECT id FROM {} WHERE id = ? AND sport_id = ?", table)
        } else {
            format!(
                "SELECT id FROM {} WHERE name = ? COLLATE NOCASE AND sport_id = ?",
                table
            )
        };
        let found = self
            .conn
            .query_row(&sql, [value, sport_id], |r| r.get::<_, String>(0))
            .optional()?;
        Ok(found)
    }

    fn age_categories(&mut self) -> anyhow::Result<&[AgeCategory]> {
        if self.age_categories.is_none() {
            let mut stmt = self
                .conn
                .prepare("SELECT id, label, max_age FROM age_categories ORDER BY label")?;
            let cats = stmt
                .query_map([], |r| {
                    Ok(AgeCategory {
                        id: r.get(0)?,
                        label: r.get(1)?,
                        max_age: r.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            if cats.is_empty() {
                // Systemic setup problem: every row of every batch will be
                // rejected until categories exist.
                log::warn!("no age categories configured; rejecting all rows");
            }
            self.age_categories = Some(cats);
        }
        Ok(self.age_categories.as_deref().unwrap_or_default())
    }
}
