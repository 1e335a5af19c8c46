//! SQL for each statistic category.
//!
//! Cluster queries read instance-wide views and return one row per database
//! (or user, or lock group). Per-database queries run on a connection to the
//! database itself and aggregate over all of its relations into one row.
//! Column aliases are the names the row decoders read.

use crate::category::StatCategory;

const LOCKS: &str = r#"
    SELECT
        COALESCE(d.datname::text, '') AS database_name,
        COALESCE(l.mode, '') AS mode,
        COALESCE(l.locktype, '') AS lock_type,
        l.granted AS granted,
        count(*)::bigint AS lock_count
    FROM pg_locks l
    LEFT JOIN pg_database d ON d.oid = l.database
    GROUP BY 1, 2, 3, 4
    ORDER BY 1, 2, 3, 4
"#;

const DISK_SIZE: &str = r#"
    SELECT
        datname::text AS database_name,
        pg_database_size(oid)::bigint AS size
    FROM pg_database
    WHERE datallowconn
      AND NOT datistemplate
      AND has_database_privilege(oid, 'CONNECT')
    ORDER BY datname
"#;

const QUERY_AGES: &str = r#"
    SELECT
        datname::text AS database_name,
        GREATEST(COALESCE(EXTRACT(EPOCH FROM max(now() - query_start) FILTER (WHERE state = 'active')), 0), 0)::double precision AS query_age,
        GREATEST(COALESCE(EXTRACT(EPOCH FROM max(now() - xact_start)), 0), 0)::double precision AS transaction_age
    FROM pg_stat_activity
    WHERE datname IS NOT NULL
      AND pid <> pg_backend_pid()
    GROUP BY datname
    ORDER BY datname
"#;

const TRANSACTIONS: &str = r#"
    SELECT
        s.datname::text AS database_name,
        s.xact_commit::bigint AS committed,
        s.xact_rollback::bigint AS rolledback
    FROM pg_stat_database s
    JOIN pg_database d ON d.oid = s.datid
    WHERE NOT d.datistemplate
    ORDER BY s.datname
"#;

const TEMP_BYTES: &str = r#"
    SELECT
        s.datname::text AS database_name,
        s.temp_bytes::bigint AS temporary_bytes
    FROM pg_stat_database s
    JOIN pg_database d ON d.oid = s.datid
    WHERE NOT d.datistemplate
    ORDER BY s.datname
"#;

const DISK_IO: &str = r#"
    SELECT
        current_database()::text AS database_name,
        COALESCE(sum(heap_blks_read), 0)::bigint AS heap_blocks_read,
        COALESCE(sum(heap_blks_hit), 0)::bigint AS heap_blocks_hit,
        COALESCE(sum(idx_blks_read), 0)::bigint AS index_blocks_read,
        COALESCE(sum(idx_blks_hit), 0)::bigint AS index_blocks_hit,
        COALESCE(sum(toast_blks_read), 0)::bigint AS toast_blocks_read,
        COALESCE(sum(toast_blks_hit), 0)::bigint AS toast_blocks_hit,
        COALESCE(sum(tidx_blks_read), 0)::bigint AS toast_index_blocks_read,
        COALESCE(sum(tidx_blks_hit), 0)::bigint AS toast_index_blocks_hit
    FROM pg_statio_all_tables
"#;

const INDEX_IO: &str = r#"
    SELECT
        current_database()::text AS database_name,
        COALESCE(sum(idx_blks_read), 0)::bigint AS index_blocks_read,
        COALESCE(sum(idx_blks_hit), 0)::bigint AS index_blocks_hit
    FROM pg_statio_all_indexes
"#;

const SEQUENCES_IO: &str = r#"
    SELECT
        current_database()::text AS database_name,
        COALESCE(sum(blks_read), 0)::bigint AS blocks_read,
        COALESCE(sum(blks_hit), 0)::bigint AS blocks_hit
    FROM pg_statio_all_sequences
"#;

const SCAN_TYPES: &str = r#"
    SELECT
        current_database()::text AS database_name,
        COALESCE(sum(seq_scan), 0)::bigint AS sequential_scans,
        COALESCE(sum(idx_scan), 0)::bigint AS index_scans
    FROM pg_stat_all_tables
"#;

const ROW_ACCESSES: &str = r#"
    SELECT
        current_database()::text AS database_name,
        COALESCE(sum(n_tup_ins), 0)::bigint AS inserted_rows,
        COALESCE(sum(n_tup_upd), 0)::bigint AS updated_rows,
        COALESCE(sum(n_tup_del), 0)::bigint AS deleted_rows,
        COALESCE(sum(n_tup_hot_upd), 0)::bigint AS hot_updated_rows,
        COALESCE(sum(n_live_tup), 0)::bigint AS live_rows,
        COALESCE(sum(n_dead_tup), 0)::bigint AS dead_rows
    FROM pg_stat_all_tables
"#;

const SIZE_BREAKDOWN: &str = r#"
    SELECT
        current_database()::text AS database_name,
        COALESCE(sum(pg_relation_size(c.oid, 'main')) FILTER (WHERE c.relkind IN ('r', 'm', 't')), 0)::bigint AS main,
        COALESCE(sum(pg_relation_size(c.oid, 'fsm')) FILTER (WHERE c.relkind IN ('r', 'm', 't')), 0)::bigint AS fsm,
        COALESCE(sum(pg_relation_size(c.oid, 'vm')) FILTER (WHERE c.relkind IN ('r', 'm', 't')), 0)::bigint AS vm,
        COALESCE(sum(pg_relation_size(c.oid, 'init')) FILTER (WHERE c.relkind IN ('r', 'm', 't')), 0)::bigint AS init,
        COALESCE(sum(pg_relation_size(c.oid)) FILTER (WHERE c.relkind = 'i'), 0)::bigint AS indexes
    FROM pg_class c
"#;

/// Builds the version-aware pg_stat_activity connection breakdown.
///
/// `backend_type` exists since PostgreSQL 10; older servers count every
/// backend.
fn build_connections_query(server_version_num: Option<i32>) -> String {
    let backend_filter = if server_version_num.unwrap_or(0) >= 100000 {
        "WHERE backend_type = 'client backend'"
    } else {
        ""
    };

    format!(
        r#"
            SELECT
                COALESCE(usename::text, '') AS username,
                count(*) FILTER (WHERE state = 'idle')::bigint AS idle,
                count(*) FILTER (WHERE state IN ('idle in transaction', 'idle in transaction (aborted)'))::bigint AS idle_in_transaction,
                count(*) FILTER (WHERE state IS NULL OR state NOT IN ('active', 'idle', 'idle in transaction', 'idle in transaction (aborted)'))::bigint AS unknown,
                count(*) FILTER (WHERE state = 'active' AND wait_event_type IS DISTINCT FROM 'Lock')::bigint AS query_active,
                count(*) FILTER (WHERE state = 'active' AND wait_event_type = 'Lock')::bigint AS waiting
            FROM pg_stat_activity
            {backend_filter}
            GROUP BY 1
            ORDER BY 1
        "#
    )
}

/// Returns the query that produces rows for `category`.
pub(super) fn build_query(category: StatCategory, server_version_num: Option<i32>) -> String {
    match category {
        StatCategory::Locks => LOCKS.to_string(),
        StatCategory::DiskSize => DISK_SIZE.to_string(),
        StatCategory::Connections => build_connections_query(server_version_num),
        StatCategory::QueryAges => QUERY_AGES.to_string(),
        StatCategory::Transactions => TRANSACTIONS.to_string(),
        StatCategory::TempBytes => TEMP_BYTES.to_string(),
        StatCategory::DiskIO => DISK_IO.to_string(),
        StatCategory::IndexIO => INDEX_IO.to_string(),
        StatCategory::SequencesIO => SEQUENCES_IO.to_string(),
        StatCategory::ScanTypes => SCAN_TYPES.to_string(),
        StatCategory::RowAccesses => ROW_ACCESSES.to_string(),
        StatCategory::SizeBreakdown => SIZE_BREAKDOWN.to_string(),
    }
}

/// Lists connectable databases for per-database collection.
pub(super) const LIST_DATABASES: &str = r#"
    SELECT datname::text
    FROM pg_database
    WHERE NOT datistemplate AND datallowconn
    ORDER BY datname
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Scope;
    use crate::source::postgres::columns;

    #[test]
    fn every_decoded_column_is_selected() {
        for category in StatCategory::all() {
            let q = build_query(category, Some(160000));
            for column in columns(category) {
                assert!(
                    q.contains(&format!("AS {}", column)),
                    "{category} query does not select {column}"
                );
            }
        }
    }

    #[test]
    fn local_queries_tag_current_database() {
        for category in StatCategory::all().filter(|c| c.scope() == Scope::PerDatabase) {
            let q = build_query(category, Some(160000));
            assert!(q.contains("current_database()::text AS database_name"));
        }
    }

    #[test]
    fn connections_query_filters_client_backends_on_pg10_plus() {
        let q = build_query(StatCategory::Connections, Some(100000));
        assert!(q.contains("backend_type = 'client backend'"));
    }

    #[test]
    fn connections_query_counts_all_backends_on_pg96() {
        let q = build_query(StatCategory::Connections, Some(90600));
        assert!(!q.contains("backend_type"));
        assert!(q.contains("FROM pg_stat_activity"));
    }

    #[test]
    fn locks_query_keeps_locks_without_database() {
        let q = build_query(StatCategory::Locks, None);
        assert!(q.contains("LEFT JOIN pg_database"));
        assert!(q.contains("COALESCE(d.datname::text, '')"));
    }

    #[test]
    fn query_ages_skip_own_backend() {
        let q = build_query(StatCategory::QueryAges, None);
        assert!(q.contains("pid <> pg_backend_pid()"));
        assert_eq!(q.matches("GREATEST(").count(), 2);
    }

    #[test]
    fn database_counters_skip_templates() {
        for category in [StatCategory::Transactions, StatCategory::TempBytes] {
            let q = build_query(category, None);
            assert!(q.contains("NOT d.datistemplate"), "{category}");
        }
        assert!(build_query(StatCategory::DiskSize, None).contains("NOT datistemplate"));
        assert!(LIST_DATABASES.contains("NOT datistemplate"));
    }

    #[test]
    fn size_breakdown_reads_every_fork() {
        let q = build_query(StatCategory::SizeBreakdown, None);
        for fork in ["'main'", "'fsm'", "'vm'", "'init'"] {
            assert!(q.contains(fork), "missing fork {fork}");
        }
    }
}
