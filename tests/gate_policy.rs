use sqlgate::gate::{validate, GateError, IssueCode};

fn issue_codes(sql: &str) -> Vec<IssueCode> {
    match validate(sql) {
        Ok(_) => Vec::new(),
        Err(GateError::Rejected(issues)) => issues.iter().map(|i| i.code).collect(),
        Err(GateError::Internal(detail)) => panic!("validator fault: {detail}"),
    }
}

fn accepts(sql: &str) -> bool {
    issue_codes(sql).is_empty()
}

fn rejects_with(sql: &str, code: IssueCode) -> bool {
    issue_codes(sql).contains(&code)
}

#[test]
fn read_only_postgres_breadth_is_accepted() {
    let statements = [
        "SELECT 1",
        "SELECT 1;",
        "SELECT id, name FROM users WHERE active",
        "SELECT * FROM a UNION ALL SELECT * FROM b",
        "SELECT x FROM a INTERSECT SELECT x FROM b",
        "SELECT x FROM a EXCEPT SELECT x FROM b",
        "WITH recent AS (SELECT * FROM events WHERE ts > now() - interval '1 day') \
         SELECT count(*) FROM recent",
        "WITH RECURSIVE tree AS (SELECT id, parent_id FROM nodes WHERE parent_id IS NULL \
         UNION ALL SELECT n.id, n.parent_id FROM nodes n JOIN tree t ON n.parent_id = t.id) \
         SELECT * FROM tree",
        "SELECT DISTINCT ON (region) region, total FROM sales ORDER BY region, total DESC",
        "SELECT rank() OVER (PARTITION BY team ORDER BY score DESC) FROM players",
        "SELECT name FROM users WHERE name ILIKE '%smith%'",
        "SELECT payload->>'kind' FROM events WHERE payload @> '{\"ok\": true}'",
        "SELECT ts AT TIME ZONE 'UTC' FROM events",
        "SELECT u.name, o.total FROM users u, LATERAL (SELECT sum(amount) AS total \
         FROM orders WHERE orders.user_id = u.id) o",
        "SELECT * FROM generate_series(1, 10)",
        "SELECT (SELECT max(v) FROM samples WHERE samples.k = t.k) FROM tags t",
        "VALUES (1, 'a'), (2, 'b')",
        "SELECT CASE WHEN n > 0 THEN 'pos' ELSE 'neg' END FROM counts",
        "SELECT count(*) FILTER (WHERE ok) FROM checks",
        "SELECT array_agg(name ORDER BY name) FROM users GROUP BY team HAVING count(*) > 3",
    ];
    for sql in statements {
        assert!(accepts(sql), "expected acceptance: {sql}\n  issues: {:?}", issue_codes(sql));
    }
}

#[test]
fn non_select_roots_are_rejected() {
    let statements = [
        "INSERT INTO users VALUES (1, 'a')",
        "UPDATE users SET name = 'x' WHERE id = 1",
        "DELETE FROM users WHERE id = 1",
        "CREATE TABLE t (id int)",
        "DROP TABLE users",
        "ALTER TABLE users ADD COLUMN x int",
        "TRUNCATE TABLE users",
        "GRANT SELECT ON users TO public",
        "REVOKE SELECT ON users FROM public",
        "COPY users TO '/tmp/out.csv'",
        "CALL do_maintenance()",
        "SET search_path TO public",
        "EXPLAIN SELECT 1",
        "SHOW server_version",
    ];
    for sql in statements {
        assert!(
            rejects_with(sql, IssueCode::NotSelect),
            "expected NOT_SELECT: {sql}\n  issues: {:?}",
            issue_codes(sql)
        );
    }
}

#[test]
fn second_statement_after_terminator_is_rejected() {
    assert!(rejects_with("SELECT 1; SELECT 2", IssueCode::MultiStatement));
    assert!(rejects_with("SELECT 1; SELECT 2;", IssueCode::MultiStatement));
    assert!(rejects_with("SELECT 1; DROP TABLE users", IssueCode::MultiStatement));
    assert!(rejects_with("SELECT 1 ;\n DELETE FROM users", IssueCode::MultiStatement));

    // Trailing terminators are fine, and semicolons inside literals,
    // quoted identifiers, and comments never count.
    assert!(accepts("SELECT 1;"));
    assert!(accepts("SELECT 1;;"));
    assert!(accepts("SELECT 'a; b' AS t"));
    assert!(accepts("SELECT 1 AS \"odd; name\""));
    assert!(accepts("SELECT 1 -- ; DROP TABLE users"));
    assert!(accepts("SELECT 1 /* ; nope */"));
    assert!(accepts("SELECT $$x; y$$"));
}

#[test]
fn select_into_is_rejected() {
    assert!(rejects_with("SELECT * INTO archived FROM users", IssueCode::SelectInto));
    assert!(rejects_with(
        "WITH c AS (SELECT 1 AS v) SELECT v INTO copied FROM c",
        IssueCode::SelectInto
    ));
}

#[test]
fn locking_clauses_are_rejected_at_any_depth() {
    let statements = [
        "SELECT * FROM users FOR UPDATE",
        "SELECT * FROM users FOR SHARE",
        "SELECT * FROM users FOR NO KEY UPDATE",
        "SELECT * FROM users FOR KEY SHARE",
        "WITH c AS (SELECT * FROM users FOR UPDATE) SELECT * FROM c",
        "SELECT * FROM (SELECT * FROM users FOR UPDATE) sub",
    ];
    for sql in statements {
        assert!(
            rejects_with(sql, IssueCode::Locking),
            "expected LOCKING: {sql}\n  issues: {:?}",
            issue_codes(sql)
        );
    }
}

#[test]
fn writes_hidden_in_ctes_are_rejected() {
    let statements = [
        "WITH i AS (INSERT INTO t VALUES (1) RETURNING 1) SELECT * FROM i",
        "WITH u AS (UPDATE t SET v = 1 RETURNING v) SELECT * FROM u",
        "WITH d AS (DELETE FROM t RETURNING id) SELECT * FROM d",
        // Nested one level down.
        "WITH outer_cte AS (WITH inner_cte AS (DELETE FROM t RETURNING id) \
         SELECT * FROM inner_cte) SELECT * FROM outer_cte",
    ];
    for sql in statements {
        assert!(
            rejects_with(sql, IssueCode::NonSelectCte),
            "expected NON_SELECT_CTE: {sql}\n  issues: {:?}",
            issue_codes(sql)
        );
    }
}

#[test]
fn denylisted_functions_are_rejected_wherever_they_appear() {
    // One row per denylisted family representative.
    let functions = [
        "pg_sleep(5)",
        "pg_sleep_for('5 seconds')",
        "pg_read_file('/etc/passwd')",
        "pg_read_binary_file('/etc/passwd')",
        "pg_ls_dir('/')",
        "pg_stat_file('/etc/passwd')",
        "lo_import('/etc/passwd')",
        "lo_export(1, '/tmp/out')",
        "pg_terminate_backend(123)",
        "pg_cancel_backend(123)",
        "pg_reload_conf()",
        "pg_switch_wal()",
        "current_setting('data_directory')",
        "set_config('x', 'y', false)",
        "has_table_privilege('users', 'SELECT')",
        "pg_has_role('admin', 'MEMBER')",
        "inet_server_addr()",
        "version()",
        "dblink('host=evil', 'SELECT 1')",
        "dblink_exec('host=evil', 'DROP TABLE t')",
        "nextval('seq')",
        "setval('seq', 1)",
        "pg_advisory_lock(1)",
        "pg_try_advisory_lock(1)",
        "pg_advisory_unlock_all()",
        "pg_notify('chan', 'msg')",
        "query_to_xml('SELECT 1', true, true, '')",
    ];
    for call in functions {
        let sql = format!("SELECT {call}");
        assert!(
            rejects_with(&sql, IssueCode::BlockedFunc),
            "expected BLOCKED_FUNC: {sql}\n  issues: {:?}",
            issue_codes(&sql)
        );
    }
}

#[test]
fn denylist_matches_any_clause_position() {
    let statements = [
        "SELECT 1 WHERE pg_sleep(1) IS NULL",
        "SELECT * FROM t ORDER BY pg_sleep(1)",
        "SELECT count(*) FROM t GROUP BY k HAVING max(v) > (SELECT pg_sleep(1))",
        "SELECT * FROM a JOIN b ON pg_sleep(1) IS NULL",
        "SELECT CASE WHEN pg_sleep(1) IS NULL THEN 1 ELSE 0 END",
        "SELECT * FROM pg_sleep(1)",
        "SELECT * FROM dblink('host=evil', 'SELECT 1') AS r(x int)",
        "WITH c AS (SELECT pg_sleep(1)) SELECT * FROM c",
        "SELECT (SELECT pg_sleep(1))",
        "SELECT sum(v) OVER (ORDER BY pg_sleep(1)) FROM t",
        "SELECT 1 LIMIT (SELECT 1 WHERE pg_sleep(1) IS NULL)",
        "SELECT 1 OFFSET (SELECT 1 WHERE pg_sleep(1) IS NULL)",
        "SELECT * FROM JSON_TABLE(pg_read_file('/etc/passwd')::jsonb, '$[*]' COLUMNS (v text PATH '$'))",
        "SELECT * FROM XMLTABLE('/r' PASSING pg_read_file('/etc/passwd') COLUMNS v text)",
    ];
    for sql in statements {
        assert!(
            rejects_with(sql, IssueCode::BlockedFunc),
            "expected BLOCKED_FUNC: {sql}\n  issues: {:?}",
            issue_codes(sql)
        );
    }
}

#[test]
fn denylist_matching_is_case_and_schema_insensitive() {
    assert!(rejects_with("SELECT PG_SLEEP(1)", IssueCode::BlockedFunc));
    assert!(rejects_with("SELECT pg_catalog.pg_sleep(1)", IssueCode::BlockedFunc));
    assert!(rejects_with("SELECT \"pg_catalog\".\"pg_sleep\"(1)", IssueCode::BlockedFunc));

    // Near-misses must not be blocked.
    assert!(accepts("SELECT my_pg_sleep(1)"));
    assert!(accepts("SELECT pg_sleep_log FROM metrics"));
}

#[test]
fn empty_input_is_rejected() {
    for sql in ["", "   ", "\n\t", ";", "-- only a comment", "/* nothing */"] {
        assert!(
            rejects_with(sql, IssueCode::EmptyQuery),
            "expected EMPTY_QUERY for {sql:?}\n  issues: {:?}",
            issue_codes(sql)
        );
    }
}

#[test]
fn unparseable_input_reports_parse_error() {
    assert!(rejects_with("SELECT * FROM", IssueCode::ParseError));
    assert!(rejects_with("SELEC 1", IssueCode::ParseError));
}

#[test]
fn dangerous_text_inside_literals_is_data_not_code() {
    assert!(accepts("SELECT 'INSERT INTO t VALUES (1)' AS quoted"));
    assert!(accepts("SELECT $$DROP TABLE users$$ AS quoted"));
    assert!(accepts("SELECT 'pg_sleep(10)' AS quoted"));
}

#[test]
fn all_issues_are_collected_not_short_circuited() {
    let codes = issue_codes("SELECT pg_sleep(1), nextval('seq') FROM t FOR UPDATE");
    assert!(codes.contains(&IssueCode::Locking));
    assert!(codes.contains(&IssueCode::BlockedFunc));
    assert!(codes.len() >= 3, "expected one issue per finding: {codes:?}");
}

#[test]
fn validation_is_idempotent() {
    for sql in [
        "SELECT * FROM users WHERE id = $1",
        "DELETE FROM users",
        "SELECT pg_sleep(1)",
        "not sql at all",
    ] {
        let first = issue_codes(sql);
        let second = issue_codes(sql);
        assert_eq!(first, second, "outcome changed between runs for {sql}");
    }
}

#[test]
fn accepted_text_is_stable_across_revalidation() {
    let once = validate("  SELECT a, b FROM t WHERE a > $1 ;  ").expect("accepted");
    let twice = validate(&once.sql).expect("revalidates");
    assert_eq!(once.sql, twice.sql);
}
