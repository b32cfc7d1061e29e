//! Per-shard statements for the patient and contact tables.
//!
//! Every function here talks to exactly one shard connection; placement and
//! fan-out are decided by the caller. Placeholders are `$1..$n`, numbered in
//! order of first appearance, which both drivers accept.

use chrono::NaiveDate;

use crate::database::{self, DatabaseType, Row, Statement, ToSql, Value};
use crate::error::Result;
use crate::identity::PatientId;
use crate::shard::ShardConnection;
use super::model::{Address, ContactEntry, Patient, DATE_FORMAT};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS patients (
        patient_id TEXT PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        gender TEXT NOT NULL,
        date_of_birth TEXT NOT NULL,
        is_active BIGINT NOT NULL DEFAULT 1,
        inactive_reason TEXT,
        primary_street TEXT NOT NULL,
        primary_city TEXT NOT NULL,
        primary_state TEXT NOT NULL,
        primary_zip_code TEXT NOT NULL,
        primary_country TEXT NOT NULL,
        secondary_street TEXT,
        secondary_city TEXT,
        secondary_state TEXT,
        secondary_zip_code TEXT,
        secondary_country TEXT
    )",
    "CREATE TABLE IF NOT EXISTS contact_infos (
        patient_id TEXT NOT NULL REFERENCES patients (patient_id) ON DELETE CASCADE,
        contact_type TEXT NOT NULL,
        value TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS ix_contact_infos_value ON contact_infos (value)",
    "CREATE INDEX IF NOT EXISTS ix_contact_infos_patient_id ON contact_infos (patient_id)",
];

const ADDRESS_FIELDS: [&str; 5] = ["street", "city", "state", "zip_code", "country"];

/// Columns written on update, in bind order
const MUTABLE_COLUMNS: [&str; 14] = [
    "first_name",
    "last_name",
    "gender",
    "date_of_birth",
    "primary_street",
    "primary_city",
    "primary_state",
    "primary_zip_code",
    "primary_country",
    "secondary_street",
    "secondary_city",
    "secondary_state",
    "secondary_zip_code",
    "secondary_country",
];

/// Every patient column, in insert bind order
const PATIENT_COLUMNS: [&str; 17] = [
    "patient_id",
    "first_name",
    "last_name",
    "gender",
    "date_of_birth",
    "is_active",
    "inactive_reason",
    "primary_street",
    "primary_city",
    "primary_state",
    "primary_zip_code",
    "primary_country",
    "secondary_street",
    "secondary_city",
    "secondary_state",
    "secondary_zip_code",
    "secondary_country",
];

/// Creates the shard's tables and the local unique index on contact value.
pub async fn ensure_schema(conn: &ShardConnection) -> Result<()> {
    let statements = SCHEMA.iter().map(|sql| Statement::new(*sql)).collect();
    conn.transaction(statements).await?;
    Ok(())
}

/// Reads one patient with its contacts.
pub async fn fetch(conn: &ShardConnection, id: &PatientId) -> Result<Option<Patient>> {
    let sql = select_patients(Some("p.patient_id = $1"));
    let id = id.to_string();
    let rows = conn.query(&sql, &[&id]).await?;
    let mut patients = group_rows(&rows).map_err(|e| conn.attribute(e))?;
    Ok(patients.pop())
}

/// Patients whose first name, last name, date-of-birth text or any contact
/// value contains `term`. Matching is case-sensitive; `None` matches all.
pub async fn search(conn: &ShardConnection, term: Option<&str>) -> Result<Vec<Patient>> {
    let rows = match term {
        Some(term) => {
            let sql = select_patients(Some(&search_filter(conn.db_type())));
            conn.query(&sql, &[&term]).await?
        }
        None => conn.query(&select_patients(None), &[]).await?,
    };
    group_rows(&rows).map_err(|e| conn.attribute(e))
}

/// Whether any of `values` is registered on this shard to a patient other
/// than `exclude`.
pub async fn contact_exists(
    conn: &ShardConnection,
    values: &[String],
    exclude: Option<&PatientId>,
) -> Result<bool> {
    if values.is_empty() {
        return Ok(false);
    }

    let mut params: Vec<Value> = values.iter().map(|v| Value::Text(v.clone())).collect();
    let mut sql = format!(
        "SELECT 1 AS hit FROM contact_infos WHERE value IN ({})",
        placeholders(1, values.len())
    );
    if let Some(id) = exclude {
        params.push(Value::Text(id.to_string()));
        sql.push_str(&format!(" AND patient_id <> ${}", params.len()));
    }
    sql.push_str(" LIMIT 1");

    let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
    let rows = conn.query(&sql, &refs).await?;
    Ok(!rows.is_empty())
}

/// Inserts a new patient and its contacts atomically.
pub async fn insert(conn: &ShardConnection, patient: &Patient) -> Result<()> {
    let sql = format!(
        "INSERT INTO patients ({}) VALUES ({})",
        PATIENT_COLUMNS.join(", "),
        placeholders(1, PATIENT_COLUMNS.len())
    );
    let stmt = Statement::new(sql)
        .bind(patient.id.to_string())
        .bind(patient.first_name.as_str())
        .bind(patient.last_name.as_str())
        .bind(patient.gender.as_str())
        .bind(patient.date_of_birth_text())
        .bind(i64::from(patient.is_active))
        .bind(patient.inactive_reason.clone());
    let stmt = bind_address(stmt, Some(&patient.primary_address));
    let stmt = bind_address(stmt, patient.secondary_address.as_ref());

    let mut statements = vec![stmt];
    statements.extend(insert_contacts(patient));
    conn.transaction(statements).await?;
    Ok(())
}

/// Overwrites the caller-controlled columns and the whole contact set.
///
/// The active flag and reason are not touched.
pub async fn replace(conn: &ShardConnection, patient: &Patient) -> Result<()> {
    let assignments: Vec<String> = MUTABLE_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ${}", column, i + 1))
        .collect();
    let sql = format!(
        "UPDATE patients SET {} WHERE patient_id = ${}",
        assignments.join(", "),
        MUTABLE_COLUMNS.len() + 1
    );

    let stmt = Statement::new(sql)
        .bind(patient.first_name.as_str())
        .bind(patient.last_name.as_str())
        .bind(patient.gender.as_str())
        .bind(patient.date_of_birth_text());
    let stmt = bind_address(stmt, Some(&patient.primary_address));
    let stmt = bind_address(stmt, patient.secondary_address.as_ref());
    let stmt = stmt.bind(patient.id.to_string());

    let mut statements = vec![
        stmt,
        Statement::new("DELETE FROM contact_infos WHERE patient_id = $1").bind(patient.id.to_string()),
    ];
    statements.extend(insert_contacts(patient));
    conn.transaction(statements).await?;
    Ok(())
}

/// Marks a patient inactive; false when no such patient exists here.
pub async fn deactivate(conn: &ShardConnection, id: &PatientId, reason: &str) -> Result<bool> {
    let id = id.to_string();
    let affected = conn
        .execute(
            "UPDATE patients SET is_active = 0, inactive_reason = $1 WHERE patient_id = $2",
            &[&reason, &id],
        )
        .await?;
    Ok(affected > 0)
}

fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn bind_address(stmt: Statement, address: Option<&Address>) -> Statement {
    match address {
        Some(a) => stmt
            .bind(a.street.as_str())
            .bind(a.city.as_str())
            .bind(a.state.as_str())
            .bind(a.zip_code.as_str())
            .bind(a.country.as_str()),
        None => ADDRESS_FIELDS.iter().fold(stmt, |stmt, _| stmt.bind(Value::Null)),
    }
}

fn insert_contacts(patient: &Patient) -> Vec<Statement> {
    patient
        .contacts
        .iter()
        .map(|c| {
            Statement::new("INSERT INTO contact_infos (patient_id, contact_type, value) VALUES ($1, $2, $3)")
                .bind(patient.id.to_string())
                .bind(c.contact_type.as_str())
                .bind(c.value.as_str())
        })
        .collect()
}

fn select_patients(filter: Option<&str>) -> String {
    let columns: Vec<String> = PATIENT_COLUMNS
        .iter()
        .map(|column| format!("p.{0} AS {0}", column))
        .collect();
    let mut sql = format!(
        "SELECT {}, c.contact_type AS contact_type, c.value AS contact_value \
         FROM patients p LEFT JOIN contact_infos c ON c.patient_id = p.patient_id",
        columns.join(", ")
    );
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    sql.push_str(" ORDER BY p.patient_id");
    sql
}

fn search_filter(db_type: DatabaseType) -> String {
    let contains = |column: &str| db_type.contains_expr(column, "$1");
    format!(
        "({} OR {} OR {} OR EXISTS (SELECT 1 FROM contact_infos m WHERE m.patient_id = p.patient_id AND {}))",
        contains("p.first_name"),
        contains("p.last_name"),
        contains("p.date_of_birth"),
        contains("m.value"),
    )
}

fn corrupt(column: &str, expected: &'static str) -> database::Error {
    database::Error::TypeMismatch {
        column: column.to_string(),
        expected,
    }
}

fn decode_address(row: &Row, prefix: &str) -> database::Result<Option<Address>> {
    let field = |name: &str| row.get::<Option<String>>(&format!("{}_{}", prefix, name));
    match field("street")? {
        Some(street) => Ok(Some(Address {
            street,
            city: field("city")?.unwrap_or_default(),
            state: field("state")?.unwrap_or_default(),
            zip_code: field("zip_code")?.unwrap_or_default(),
            country: field("country")?.unwrap_or_default(),
        })),
        None => Ok(None),
    }
}

fn decode_patient(row: &Row) -> database::Result<Patient> {
    let id: String = row.get("patient_id")?;
    let id = id
        .parse::<PatientId>()
        .map_err(|_| corrupt("patient_id", "patient identifier"))?;
    let date_of_birth: String = row.get("date_of_birth")?;
    let date_of_birth = NaiveDate::parse_from_str(&date_of_birth, DATE_FORMAT)
        .map_err(|_| corrupt("date_of_birth", "YYYY-MM-DD date"))?;
    let primary_address = decode_address(row, "primary")?
        .ok_or_else(|| corrupt("primary_street", "String"))?;

    Ok(Patient {
        id,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        gender: row.get("gender")?,
        date_of_birth,
        is_active: row.get("is_active")?,
        inactive_reason: row.get("inactive_reason")?,
        primary_address,
        secondary_address: decode_address(row, "secondary")?,
        contacts: Vec::new(),
    })
}

/// Folds joined patient/contact rows into patients. Rows of one patient are
/// adjacent because the query orders by patient id.
fn group_rows(rows: &[Row]) -> database::Result<Vec<Patient>> {
    let mut patients: Vec<Patient> = Vec::new();
    let mut current: Option<String> = None;

    for row in rows {
        let id: String = row.get("patient_id")?;
        if current.as_deref() != Some(id.as_str()) {
            patients.push(decode_patient(row)?);
            current = Some(id);
        }

        let contact_type: Option<String> = row.get("contact_type")?;
        let value: Option<String> = row.get("contact_value")?;
        if let (Some(contact_type), Some(value), Some(patient)) = (contact_type, value, patients.last_mut()) {
            patient.contacts.push(ContactEntry { contact_type, value });
        }
    }

    for patient in &mut patients {
        patient.contacts.sort();
    }
    Ok(patients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    use crate::database::sqlite::SqliteDatabase;
    use crate::database::DatabaseConfig;
    use crate::error::Error;
    use crate::shard::{ConnectionRole, ShardIndex};

    async fn shard(path: &std::path::Path) -> ShardConnection {
        let db = SqliteDatabase::connect(DatabaseConfig::new_sqlite(path.to_str().unwrap()))
            .await
            .unwrap();
        let conn = ShardConnection::new(ShardIndex(0), ConnectionRole::Master, Arc::new(db), Duration::from_secs(5));
        ensure_schema(&conn).await.unwrap();
        conn
    }

    fn patient(id: u64, contacts: &[&str]) -> Patient {
        let address = Address {
            street: "1 Main St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            zip_code: "62701".into(),
            country: "US".into(),
        };
        Patient {
            id: PatientId::Sequential(id),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            gender: "Female".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1906, 12, 9).unwrap(),
            is_active: true,
            inactive_reason: None,
            primary_address: address,
            secondary_address: None,
            contacts: contacts.iter().map(|v| ContactEntry::new("email", *v)).collect(),
        }
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1, 3), "$1, $2, $3");
        assert_eq!(placeholders(4, 1), "$4");
        assert_eq!(placeholders(1, 0), "");
    }

    #[test]
    fn test_select_keeps_column_names_stable() {
        let sql = select_patients(Some("p.patient_id = $1"));
        assert!(sql.starts_with("SELECT p.patient_id AS patient_id, p.first_name AS first_name"));
        assert!(sql.ends_with("WHERE p.patient_id = $1 ORDER BY p.patient_id"));
        assert!(search_filter(DatabaseType::PostgreSQL).contains("strpos(m.value, $1) > 0"));
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let dir = tempdir().unwrap();
        let conn = shard(&dir.path().join("s.db")).await;
        ensure_schema(&conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_fetch_and_group_contacts() {
        let dir = tempdir().unwrap();
        let conn = shard(&dir.path().join("s.db")).await;

        let stored = patient(1, &["b@example.com", "a@example.com"]);
        insert(&conn, &stored).await.unwrap();
        insert(&conn, &patient(2, &[])).await.unwrap();

        let fetched = fetch(&conn, &PatientId::Sequential(1)).await.unwrap().unwrap();
        assert_eq!(fetched.contacts[0].value, "a@example.com");
        assert_eq!(fetched.contacts.len(), 2);
        assert_eq!(fetched.date_of_birth, stored.date_of_birth);

        let lonely = fetch(&conn, &PatientId::Sequential(2)).await.unwrap().unwrap();
        assert!(lonely.contacts.is_empty());

        assert!(fetch(&conn, &PatientId::Sequential(3)).await.unwrap().is_none());
        assert_eq!(search(&conn, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_local_unique_index_is_conflict() {
        let dir = tempdir().unwrap();
        let conn = shard(&dir.path().join("s.db")).await;

        insert(&conn, &patient(1, &["dup@example.com"])).await.unwrap();
        let err = insert(&conn, &patient(2, &["dup@example.com"])).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "got {:?}", err);

        // The patient row was rolled back with its contacts
        assert!(fetch(&conn, &PatientId::Sequential(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contact_exists_honours_exclusion() {
        let dir = tempdir().unwrap();
        let conn = shard(&dir.path().join("s.db")).await;
        insert(&conn, &patient(1, &["me@example.com"])).await.unwrap();

        let values = vec!["other@example.com".to_string(), "me@example.com".to_string()];
        assert!(contact_exists(&conn, &values, None).await.unwrap());
        assert!(!contact_exists(&conn, &values, Some(&PatientId::Sequential(1))).await.unwrap());
        assert!(!contact_exists(&conn, &[], None).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_is_case_sensitive_substring() {
        let dir = tempdir().unwrap();
        let conn = shard(&dir.path().join("s.db")).await;
        insert(&conn, &patient(1, &["grace@navy.mil"])).await.unwrap();

        assert_eq!(search(&conn, Some("Hop")).await.unwrap().len(), 1);
        assert_eq!(search(&conn, Some("1906-12")).await.unwrap().len(), 1);
        assert_eq!(search(&conn, Some("navy.mil")).await.unwrap().len(), 1);
        assert!(search(&conn, Some("hop")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_and_deactivate() {
        let dir = tempdir().unwrap();
        let conn = shard(&dir.path().join("s.db")).await;

        let mut record = patient(1, &["old@example.com"]);
        record.secondary_address = Some(record.primary_address.clone());
        insert(&conn, &record).await.unwrap();

        assert!(deactivate(&conn, &record.id, "moved away").await.unwrap());
        assert!(!deactivate(&conn, &PatientId::Sequential(99), "n/a").await.unwrap());

        record.last_name = "Murray".into();
        record.secondary_address = None;
        record.contacts = vec![ContactEntry::new("phone", "555-0100")];
        record.is_active = true;
        replace(&conn, &record).await.unwrap();

        let fetched = fetch(&conn, &record.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_name, "Murray");
        assert_eq!(fetched.secondary_address, None);
        assert_eq!(fetched.contacts, vec![ContactEntry::new("phone", "555-0100")]);
        assert!(!fetched.is_active);
        assert_eq!(fetched.inactive_reason.as_deref(), Some("moved away"));
    }
}
