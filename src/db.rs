/// Database connection helpers.
///
/// Every binary opens exactly one connection at startup, verifies the schema
/// it needs, and drops the connection on exit.

use postgres::{Client, NoTls};

use crate::config;
use crate::logging::{self, Component};
use crate::model::GloriaError;

/// Opens a connection using `DATABASE_URL`.
pub fn connect() -> Result<Client, GloriaError> {
    let url = config::database_url()?;
    Client::connect(&url, NoTls).map_err(|e| {
        GloriaError::Database(format!("Could not connect to PostgreSQL: {}", e))
    })
}

/// Opens a connection and checks that every schema in `schemas` exists,
/// along with the PostGIS extension.
///
/// The error message lists what is missing so the operator can apply
/// `sql/001_gloria_schema.sql`.
pub fn connect_and_verify(schemas: &[&str]) -> Result<Client, GloriaError> {
    let mut client = connect()?;

    let mut missing = Vec::new();
    for schema in schemas {
        let row = client.query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
            &[schema],
        )?;
        let exists: bool = row.get(0);
        if !exists {
            missing.push(schema.to_string());
        }
    }

    let row = client.query_one(
        "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'postgis')",
        &[],
    )?;
    let has_postgis: bool = row.get(0);
    if !has_postgis {
        missing.push("extension postgis".to_string());
    }

    if !missing.is_empty() {
        return Err(GloriaError::Database(format!(
            "Database is missing: {}. Apply sql/001_gloria_schema.sql first.",
            missing.join(", ")
        )));
    }

    logging::debug(Component::Database, None, "Connection verified");
    Ok(client)
}
