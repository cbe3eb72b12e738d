//! The backing row source.
//!
//! [`RowSource`] is the narrow contract the engine consumes: bulk ontology
//! loads, the two taxonomy narrowing queries, and paged, deterministic-order
//! sample/observation fetches. [`SqliteStore`] implements it against SQLite
//! and owns every SQL string in the crate. The connection is not assumed
//! thread safe, so each call acquires it for its own scope and releases it on
//! every exit path.

use std::sync::Mutex;

use roaring::RoaringTreemap;
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use serde::{Deserialize, Serialize};

use crate::compose::Selection;
use crate::error::{OtuscopeError, Result};
use crate::filter::{ContextualFilter, ContextualPredicateTerm};
use crate::schema::{AmpliconId, OntologyId, OtuId, Rank, SampleId};

// ------------- Rows -------------
/// One sample with its contextual attributes, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub sample_id: SampleId,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub depth: Option<f64>,
    pub ph: Option<f64>,
    pub organic_carbon: Option<f64>,
    pub date_sampled: Option<chrono::NaiveDate>,
    pub time_sampled: Option<chrono::NaiveTime>,
    pub sample_site: Option<String>,
    pub notes: Option<String>,
    pub env_material: Option<OntologyId>,
    pub vegetation_type: Option<OntologyId>,
}

/// One OTU with its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct OtuRecord {
    pub otu_id: OtuId,
    pub code: String,
    pub amplicon: AmpliconId,
    pub ranks: [Option<OntologyId>; 7],
    pub traits: Option<String>,
}

/// One sample × taxon × count observation, joined with its OTU.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRow {
    pub sample_id: SampleId,
    pub count: i64,
    pub otu: OtuRecord,
}

// ------------- RowSource -------------
/// Paged query execution against the stored dataset. Row order is
/// deterministic (primary key order) so dense index assignment and cached
/// results are reproducible across runs.
pub trait RowSource: Send + Sync {
    /// All (id, label) terms of one ontology vocabulary.
    fn ontology_terms(&self, ontology: &str) -> Result<Vec<(OntologyId, String)>>;

    /// Does at least one OTU of this amplicon match all rank constraints?
    fn taxon_exists(
        &self,
        amplicon: AmpliconId,
        constraints: &[(Rank, OntologyId)],
    ) -> Result<bool>;

    /// Distinct values present at `target` under the given rank constraints.
    fn distinct_rank_values(
        &self,
        amplicon: AmpliconId,
        constraints: &[(Rank, OntologyId)],
        target: Rank,
    ) -> Result<Vec<OntologyId>>;

    /// Ids of every sample the selection matches.
    fn select_sample_ids(&self, selection: &Selection) -> Result<RoaringTreemap>;

    /// One page of matching samples with attributes, sample_id ascending,
    /// strictly after `after`.
    fn sample_page(
        &self,
        selection: &Selection,
        after: Option<SampleId>,
        limit: usize,
    ) -> Result<Vec<SampleRow>>;

    /// One page of matching observations, (sample_id, otu_id) ascending,
    /// strictly after `after`.
    fn observation_page(
        &self,
        selection: &Selection,
        after: Option<(SampleId, OtuId)>,
        limit: usize,
    ) -> Result<Vec<ObservationRow>>;
}

// ------------- SQL rendering -------------
fn range_sql(
    column: &str,
    lo: Option<Value>,
    hi: Option<Value>,
    params: &mut Vec<Value>,
) -> String {
    match (lo, hi) {
        (Some(l), Some(h)) => {
            params.push(l);
            params.push(h);
            format!("(s.{column} >= ? and s.{column} <= ?)")
        }
        (Some(l), None) => {
            params.push(l);
            format!("s.{column} >= ?")
        }
        (None, Some(h)) => {
            params.push(h);
            format!("s.{column} <= ?")
        }
        // The compiler rejects unbounded ranges; render a tautology anyway.
        (None, None) => "1 = 1".to_string(),
    }
}

fn term_sql(term: &ContextualPredicateTerm, params: &mut Vec<Value>) -> String {
    match term {
        ContextualPredicateTerm::RangeNumeric { field, lo, hi } => range_sql(
            field,
            lo.map(Value::Real),
            hi.map(Value::Real),
            params,
        ),
        ContextualPredicateTerm::RangeLongitude { field, lo, hi } => match (lo, hi) {
            // lo > hi means the range crosses the dateline and wraps around.
            (Some(l), Some(h)) if l > h => {
                params.push(Value::Real(*l));
                params.push(Value::Real(*h));
                format!("(s.{field} >= ? or s.{field} <= ?)")
            }
            _ => range_sql(field, lo.map(Value::Real), hi.map(Value::Real), params),
        },
        ContextualPredicateTerm::RangeDate { field, lo, hi } => range_sql(
            field,
            lo.map(|d| Value::Text(d.format("%Y-%m-%d").to_string())),
            hi.map(|d| Value::Text(d.format("%Y-%m-%d").to_string())),
            params,
        ),
        ContextualPredicateTerm::RangeTime { field, lo, hi } => range_sql(
            field,
            lo.map(|t| Value::Text(t.format("%H:%M:%S").to_string())),
            hi.map(|t| Value::Text(t.format("%H:%M:%S").to_string())),
            params,
        ),
        ContextualPredicateTerm::StringContains {
            field,
            substring,
            complement,
        } => {
            params.push(Value::Text(substring.clone()));
            params.push(Value::Text(substring.clone()));
            let contains = format!("(? = '' or instr(lower(coalesce(s.{field}, '')), lower(?)) > 0)");
            if *complement {
                format!("not {contains}")
            } else {
                contains
            }
        }
        ContextualPredicateTerm::OntologyEquals { field, id } => {
            params.push(Value::Integer(*id));
            format!("s.{field} = ?")
        }
        ContextualPredicateTerm::SampleIdIn { ids } => {
            let placeholders = vec!["?"; ids.len()].join(", ");
            for id in ids {
                params.push(Value::Integer(*id as i64));
            }
            format!("s.sample_id in ({placeholders})")
        }
    }
}

fn contextual_sql(filter: &ContextualFilter, params: &mut Vec<Value>) -> Option<String> {
    if filter.is_empty() {
        return None;
    }
    let rendered: Vec<String> = filter.terms.iter().map(|t| term_sql(t, params)).collect();
    Some(format!(
        "({})",
        rendered.join(&format!(" {} ", filter.mode.keyword()))
    ))
}

/// OTU-membership clause for the sample population. An all-None taxonomy
/// vector must not trigger the distinct-OTU subquery at all.
fn taxonomy_sql(selection: &Selection, params: &mut Vec<Value>) -> Option<String> {
    if selection.taxonomy.is_empty() {
        return None;
    }
    let mut sql = String::from(
        "s.sample_id in (select o.sample_id from Observation o \
         join Otu t on t.otu_id = o.otu_id where t.amplicon_id = ?",
    );
    params.push(Value::Integer(selection.amplicon));
    for (rank, id) in selection.taxonomy.constraints() {
        sql.push_str(&format!(" and t.{} = ?", rank.column()));
        params.push(Value::Integer(id));
    }
    sql.push(')');
    Some(sql)
}

fn sample_where(selection: &Selection, params: &mut Vec<Value>) -> String {
    let mut clauses = Vec::new();
    if let Some(clause) = taxonomy_sql(selection, params) {
        clauses.push(clause);
    }
    if let Some(clause) = contextual_sql(&selection.contextual, params) {
        clauses.push(clause);
    }
    if clauses.is_empty() {
        "1 = 1".to_string()
    } else {
        clauses.join(" and ")
    }
}

// ------------- SqliteStore -------------
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const SAMPLE_COLUMNS: &str = "s.sample_id, s.latitude, s.longitude, s.depth, s.ph, \
     s.organic_carbon, s.date_sampled, s.time_sampled, s.sample_site, s.notes, \
     s.env_material, s.vegetation_type";

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        Self::bootstrap(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            create table if not exists Ontology (
                Ontology text not null,
                Term_Id integer not null,
                Label text not null,
                constraint referenceable_Term primary key (
                    Ontology,
                    Term_Id
                )
            );
            create table if not exists Sample (
                sample_id integer not null,
                latitude real null,
                longitude real null,
                depth real null,
                ph real null,
                organic_carbon real null,
                date_sampled text null,
                time_sampled text null,
                sample_site text null,
                notes text null,
                env_material integer null,
                vegetation_type integer null,
                constraint referenceable_Sample primary key (
                    sample_id
                )
            );
            create table if not exists Otu (
                otu_id integer not null,
                code text not null,
                amplicon_id integer not null,
                kingdom_id integer null,
                phylum_id integer null,
                class_id integer null,
                order_id integer null,
                family_id integer null,
                genus_id integer null,
                species_id integer null,
                traits text null,
                constraint referenceable_Otu primary key (
                    otu_id
                ),
                constraint unique_Otu_code unique (
                    code
                )
            );
            create table if not exists Observation (
                sample_id integer not null,
                otu_id integer not null,
                count integer not null,
                constraint Observation_of_Sample foreign key (
                    sample_id
                ) references Sample(sample_id),
                constraint Observation_of_Otu foreign key (
                    otu_id
                ) references Otu(otu_id),
                constraint unique_Observation primary key (
                    sample_id,
                    otu_id
                )
            );
            create index if not exists Observation_by_Otu on Observation(otu_id);
            create index if not exists Otu_by_amplicon on Otu(amplicon_id);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| OtuscopeError::Lock(e.to_string()))
    }

    // ------------- Adders -------------
    pub fn insert_ontology_term(
        &self,
        ontology: &str,
        id: OntologyId,
        label: &str,
    ) -> Result<()> {
        let conn = self.connection()?;
        conn.prepare_cached(
            "insert or replace into Ontology (Ontology, Term_Id, Label) values (?, ?, ?)",
        )?
        .execute(params![ontology, id, label])?;
        Ok(())
    }

    pub fn insert_sample(&self, sample: &SampleRow) -> Result<()> {
        let conn = self.connection()?;
        conn.prepare_cached(
            "insert or replace into Sample (
                sample_id, latitude, longitude, depth, ph, organic_carbon,
                date_sampled, time_sampled, sample_site, notes,
                env_material, vegetation_type
            ) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?
        .execute(params![
            sample.sample_id as i64,
            sample.latitude,
            sample.longitude,
            sample.depth,
            sample.ph,
            sample.organic_carbon,
            sample.date_sampled,
            sample.time_sampled,
            sample.sample_site,
            sample.notes,
            sample.env_material,
            sample.vegetation_type,
        ])?;
        Ok(())
    }

    pub fn insert_otu(&self, otu: &OtuRecord) -> Result<()> {
        let conn = self.connection()?;
        conn.prepare_cached(
            "insert or replace into Otu (
                otu_id, code, amplicon_id,
                kingdom_id, phylum_id, class_id, order_id,
                family_id, genus_id, species_id, traits
            ) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?
        .execute(params![
            otu.otu_id as i64,
            otu.code,
            otu.amplicon,
            otu.ranks[0],
            otu.ranks[1],
            otu.ranks[2],
            otu.ranks[3],
            otu.ranks[4],
            otu.ranks[5],
            otu.ranks[6],
            otu.traits,
        ])?;
        Ok(())
    }

    pub fn insert_observation(
        &self,
        sample_id: SampleId,
        otu_id: OtuId,
        count: i64,
    ) -> Result<()> {
        let conn = self.connection()?;
        conn.prepare_cached(
            "insert or replace into Observation (sample_id, otu_id, count) values (?, ?, ?)",
        )?
        .execute(params![sample_id as i64, otu_id as i64, count])?;
        Ok(())
    }
}

fn sample_from_row(row: &rusqlite::Row) -> rusqlite::Result<SampleRow> {
    Ok(SampleRow {
        sample_id: row.get::<_, i64>(0)? as SampleId,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        depth: row.get(3)?,
        ph: row.get(4)?,
        organic_carbon: row.get(5)?,
        date_sampled: row.get(6)?,
        time_sampled: row.get(7)?,
        sample_site: row.get(8)?,
        notes: row.get(9)?,
        env_material: row.get(10)?,
        vegetation_type: row.get(11)?,
    })
}

fn observation_from_row(row: &rusqlite::Row) -> rusqlite::Result<ObservationRow> {
    Ok(ObservationRow {
        sample_id: row.get::<_, i64>(0)? as SampleId,
        count: row.get(2)?,
        otu: OtuRecord {
            otu_id: row.get::<_, i64>(1)? as OtuId,
            code: row.get(3)?,
            amplicon: row.get(4)?,
            ranks: [
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
                row.get(11)?,
            ],
            traits: row.get(12)?,
        },
    })
}

impl RowSource for SqliteStore {
    fn ontology_terms(&self, ontology: &str) -> Result<Vec<(OntologyId, String)>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(
            "select Term_Id, Label from Ontology where Ontology = ? order by Label, Term_Id",
        )?;
        let terms = stmt
            .query_map(params![ontology], |row| {
                Ok((row.get::<_, OntologyId>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(terms)
    }

    fn taxon_exists(
        &self,
        amplicon: AmpliconId,
        constraints: &[(Rank, OntologyId)],
    ) -> Result<bool> {
        let mut sql = String::from("select exists(select 1 from Otu t where t.amplicon_id = ?");
        let mut params: Vec<Value> = vec![Value::Integer(amplicon)];
        for (rank, id) in constraints {
            sql.push_str(&format!(" and t.{} = ?", rank.column()));
            params.push(Value::Integer(*id));
        }
        sql.push(')');
        let conn = self.connection()?;
        let exists: bool =
            conn.prepare_cached(&sql)?
                .query_row(params_from_iter(params), |row| row.get(0))?;
        Ok(exists)
    }

    fn distinct_rank_values(
        &self,
        amplicon: AmpliconId,
        constraints: &[(Rank, OntologyId)],
        target: Rank,
    ) -> Result<Vec<OntologyId>> {
        let mut sql = format!(
            "select distinct t.{col} from Otu t where t.amplicon_id = ? and t.{col} is not null",
            col = target.column()
        );
        let mut params: Vec<Value> = vec![Value::Integer(amplicon)];
        for (rank, id) in constraints {
            sql.push_str(&format!(" and t.{} = ?", rank.column()));
            params.push(Value::Integer(*id));
        }
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let values = stmt
            .query_map(params_from_iter(params), |row| row.get::<_, OntologyId>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(values)
    }

    fn select_sample_ids(&self, selection: &Selection) -> Result<RoaringTreemap> {
        let mut params: Vec<Value> = Vec::new();
        let where_clause = sample_where(selection, &mut params);
        let sql = format!(
            "select s.sample_id from Sample s where {where_clause} order by s.sample_id"
        );
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut ids = RoaringTreemap::new();
        let rows = stmt.query_map(params_from_iter(params), |row| row.get::<_, i64>(0))?;
        for id in rows {
            ids.insert(id? as u64);
        }
        Ok(ids)
    }

    fn sample_page(
        &self,
        selection: &Selection,
        after: Option<SampleId>,
        limit: usize,
    ) -> Result<Vec<SampleRow>> {
        let mut params: Vec<Value> = Vec::new();
        let mut where_clause = sample_where(selection, &mut params);
        if let Some(cursor) = after {
            where_clause.push_str(" and s.sample_id > ?");
            params.push(Value::Integer(cursor as i64));
        }
        params.push(Value::Integer(limit as i64));
        let sql = format!(
            "select {SAMPLE_COLUMNS} from Sample s \
             where {where_clause} order by s.sample_id limit ?"
        );
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let samples = stmt
            .query_map(params_from_iter(params), sample_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    fn observation_page(
        &self,
        selection: &Selection,
        after: Option<(SampleId, OtuId)>,
        limit: usize,
    ) -> Result<Vec<ObservationRow>> {
        // Rank constraints apply to the joined Otu row directly; any emitted
        // observation implies its sample passes the OTU-membership clause, so
        // the sample subquery only needs the contextual filter.
        let mut sql = String::from(
            "select o.sample_id, o.otu_id, o.count, t.code, t.amplicon_id, \
             t.kingdom_id, t.phylum_id, t.class_id, t.order_id, \
             t.family_id, t.genus_id, t.species_id, t.traits \
             from Observation o join Otu t on t.otu_id = o.otu_id \
             where t.amplicon_id = ?",
        );
        let mut params: Vec<Value> = vec![Value::Integer(selection.amplicon)];
        for (rank, id) in selection.taxonomy.constraints() {
            sql.push_str(&format!(" and t.{} = ?", rank.column()));
            params.push(Value::Integer(id));
        }
        if let Some(clause) = contextual_sql(&selection.contextual, &mut params) {
            sql.push_str(&format!(
                " and o.sample_id in (select s.sample_id from Sample s where {clause})"
            ));
        }
        if let Some((sample_cursor, otu_cursor)) = after {
            sql.push_str(
                " and (o.sample_id > ? or (o.sample_id = ? and o.otu_id > ?))",
            );
            params.push(Value::Integer(sample_cursor as i64));
            params.push(Value::Integer(sample_cursor as i64));
            params.push(Value::Integer(otu_cursor as i64));
        }
        sql.push_str(" order by o.sample_id, o.otu_id limit ?");
        params.push(Value::Integer(limit as i64));
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), observation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
