//! SQL database abstraction trait.

/// Marker for a SQL backend the stores can be instantiated over.
///
/// Stores are written once against sea-query statements; each backend
/// supplies its pool type and renders statements in its own dialect.
pub trait SqlDatabase: Send + Sync + 'static {
    /// The connection pool type for this database.
    type Pool: Clone + Send + Sync;

    /// Build a SQL query string from a sea-query SELECT statement.
    fn build_select(stmt: sea_query::SelectStatement) -> String;

    /// Build a SQL query string from a sea-query INSERT statement.
    fn build_insert(stmt: sea_query::InsertStatement) -> String;

    /// Build a SQL query string from a sea-query UPDATE statement.
    fn build_update(stmt: sea_query::UpdateStatement) -> String;

    /// Build a SQL query string from a sea-query DELETE statement.
    fn build_delete(stmt: sea_query::DeleteStatement) -> String;

    /// Column declaration for an auto-incrementing integer primary key.
    fn serial_primary_key() -> &'static str;
}
