//! Event log database schema.
//!
//! The constraint names must match the constants in
//! `chronicle_core::store`; the commit layer uses them to classify
//! unique-index violations.

/// SQL to create the event log and aggregates tables.
pub const CREATE_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS event_log (
    sequence_number        BIGINT NOT NULL,
    event_source           VARCHAR(255) NOT NULL,
    aggregate_type         UUID,
    aggregate_root_version BIGINT,
    content                JSONB NOT NULL,
    occurred_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT event_log_sequence_number_key PRIMARY KEY (sequence_number)
);

CREATE TABLE IF NOT EXISTS aggregate_roots (
    event_source   VARCHAR(255) NOT NULL,
    aggregate_type UUID NOT NULL,
    version        BIGINT NOT NULL,
    CONSTRAINT aggregate_roots_key UNIQUE (event_source, aggregate_type)
);

CREATE INDEX IF NOT EXISTS idx_event_log_aggregate
    ON event_log (event_source, aggregate_type, aggregate_root_version);
";

#[cfg(test)]
mod tests {
    use chronicle_core::store::{AGGREGATE_KEY_CONSTRAINT, EVENT_LOG_SEQUENCE_CONSTRAINT};

    use super::CREATE_SCHEMA;

    #[test]
    fn ddl_uses_the_constraint_names_the_protocol_classifies() {
        assert!(CREATE_SCHEMA.contains(EVENT_LOG_SEQUENCE_CONSTRAINT));
        assert!(CREATE_SCHEMA.contains(AGGREGATE_KEY_CONSTRAINT));
    }
}
