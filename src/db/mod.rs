//! Store access: catalog queries, SQL generation and the wire connector

pub mod connector;
pub mod schema;

pub use connector::{
    ConnectionSpec, ConnectionSpecBuilder, Connector, ConnectorFactory, PgConnectorFactory,
};
pub use schema::{Column, SqlType, TableRef};
