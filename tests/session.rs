mod common;

use common::{RecordingConnector, import_config};
use csv2table::coerce::SemanticColumnType;
use csv2table::error::ImportError;
use csv2table::schema::TableAction;
use csv2table::session::{DbService, ImportSession, SessionState};

fn row(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

const SALES_CONFIG: &str = r#"
db = "imports"
table = "sales"

[mapping.Amount]
format = "1.2"
nullIfEmpty = true

[mapping.Created]
type = "DATE NULL"
format = "2006-01-02"
"#;

#[test]
fn imports_header_and_rows_end_to_end() {
    let connector = RecordingConnector::new();
    let mut session = ImportSession::new(connector.clone());
    session
        .start("sales.csv", import_config("sales.csv", SALES_CONFIG))
        .expect("start");
    assert_eq!(session.state(), SessionState::Connected);

    session
        .process_header(&row(&["Name", "Amount", "Created"]))
        .expect("header");
    assert_eq!(session.state(), SessionState::SchemaReady);
    assert_eq!(session.column_names(), vec!["name", "amount", "created"]);
    assert_eq!(
        session.semantic_types(),
        vec![
            SemanticColumnType::String,
            SemanticColumnType::String,
            SemanticColumnType::Date,
        ]
    );

    session
        .process_line(&row(&["Ann", "1,200.50", "2019-05-21"]))
        .expect("first row");
    session
        .process_line(&row(&["Bob", "", "2019-05-22"]))
        .expect("second row");
    assert_eq!(session.state(), SessionState::Streaming);
    assert!(connector.inserts().is_empty());

    session.end().expect("end");
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.row_count(), 2);
    assert_eq!(session.table_action(), Some(TableAction::Created));

    let ddl = connector.ddl();
    assert_eq!(ddl.len(), 1);
    assert!(ddl[0].starts_with("CREATE TABLE `sales` (\n  `name` VARCHAR(255) NULL DEFAULT NULL,"));
    assert!(ddl[0].contains("`created` DATE NULL"));
    assert!(ddl[0].ends_with(") COLLATE='utf8_general_ci' ENGINE=InnoDB"));

    assert_eq!(
        connector.inserts(),
        vec![
            "INSERT INTO `sales` (`name`,`amount`,`created`) VALUES\n\
             ('Ann','1,200.50','2019-05-21'),\n\
             ('Bob',NULL,'2019-05-22')"
                .to_string()
        ]
    );
    assert_eq!(connector.closes(), 1);
}

#[test]
fn full_batches_flush_while_streaming() {
    let connector = RecordingConnector::new();
    let mut session = ImportSession::new(connector.clone());
    let config = import_config("n.csv", "db = \"imports\"\nbulkInsertSize = 3\n");
    session.start("n.csv", config).unwrap();
    session.process_header(&row(&["n"])).unwrap();

    for value in ["1", "2"] {
        session.process_line(&row(&[value])).unwrap();
    }
    assert_eq!(session.flush_count(), 0);
    session.process_line(&row(&["3"])).unwrap();
    assert_eq!(session.flush_count(), 1);
    session.process_line(&row(&["4"])).unwrap();
    assert_eq!(session.flush_count(), 1);

    session.end().unwrap();
    let inserts = connector.inserts();
    assert_eq!(inserts.len(), 2);
    assert!(inserts[0].ends_with("('1'),\n('2'),\n('3')"));
    assert!(inserts[1].ends_with("VALUES\n('4')"));
}

#[test]
fn column_count_mismatch_reports_line_and_skips_row() {
    let connector = RecordingConnector::new();
    let mut session = ImportSession::new(connector.clone());
    session
        .start("sales.csv", import_config("sales.csv", SALES_CONFIG))
        .unwrap();
    session
        .process_header(&row(&["Name", "Amount", "Created"]))
        .unwrap();
    session
        .process_line(&row(&["Ann", "1", "2019-05-21"]))
        .unwrap();

    let err = session.process_line(&row(&["Bob", "2"])).unwrap_err();
    match err {
        ImportError::ColumnCountMismatch {
            line,
            expected,
            found,
        } => {
            assert_eq!(line, 3);
            assert_eq!(expected, 3);
            assert_eq!(found, 2);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(session.row_count(), 1);

    session.close();
    assert!(connector.inserts().is_empty());
    assert_eq!(connector.closes(), 1);
}

#[test]
fn malformed_date_is_a_format_error() {
    let config = r#"
db = "imports"

[mapping.day]
type = "DATE"
format = "02.01.2006"
"#;
    let connector = RecordingConnector::new();
    let mut session = ImportSession::new(connector.clone());
    session.start("days.csv", import_config("days.csv", config)).unwrap();
    session.process_header(&row(&["Day"])).unwrap();
    session.process_line(&row(&["01.12.2019"])).unwrap();

    let err = session.process_line(&row(&["01.-12.2019"])).unwrap_err();
    assert!(matches!(err, ImportError::Format { ref value, .. } if value == "01.-12.2019"));
    drop(session);
    assert_eq!(connector.closes(), 1);
    assert!(connector.inserts().is_empty());
}

#[test]
fn existing_table_types_drive_coercion() {
    let config = r#"
db = "imports"
table = "prices"

[mapping.amount]
format = "1,2"
"#;
    let connector =
        RecordingConnector::new().with_table("prices", &[("Item", "varchar(40)"), ("Amount", "decimal(12,2)")]);
    let mut session = ImportSession::new(connector.clone());
    session.start("p.csv", import_config("p.csv", config)).unwrap();
    session.process_header(&row(&["item", "amount"])).unwrap();

    assert_eq!(session.table_action(), Some(TableAction::Kept));
    assert_eq!(
        session.semantic_types(),
        vec![SemanticColumnType::String, SemanticColumnType::Float]
    );
    session.process_line(&row(&["lamp", "1500,50"])).unwrap();
    session.end().unwrap();

    assert!(connector.ddl().is_empty());
    assert_eq!(
        connector.inserts(),
        vec!["INSERT INTO `prices` (`item`,`amount`) VALUES\n('lamp','1500.50')".to_string()]
    );
}

#[test]
fn drop_recreates_and_truncate_keeps_existing_tables() {
    let dropping = RecordingConnector::new().with_table("t", &[("a", "int")]);
    let mut session = ImportSession::new(dropping.clone());
    session
        .start("t.csv", import_config("t.csv", "db = \"x\"\ndrop = true\ntruncate = true\n"))
        .unwrap();
    session.process_header(&row(&["a"])).unwrap();
    assert_eq!(session.table_action(), Some(TableAction::Recreated));
    let ddl = dropping.ddl();
    assert_eq!(ddl.len(), 2);
    assert_eq!(ddl[0], "DROP TABLE `t`");
    assert!(ddl[1].starts_with("CREATE TABLE `t`"));
    session.close();

    let truncating = RecordingConnector::new().with_table("t", &[("a", "int")]);
    let mut session = ImportSession::new(truncating.clone());
    session
        .start("t.csv", import_config("t.csv", "db = \"x\"\ntruncate = true\n"))
        .unwrap();
    session.process_header(&row(&["a"])).unwrap();
    assert_eq!(session.table_action(), Some(TableAction::Truncated));
    assert_eq!(session.semantic_types(), vec![SemanticColumnType::Int]);
    assert_eq!(truncating.ddl(), vec!["TRUNCATE TABLE `t`".to_string()]);
}

#[test]
fn refused_connection_never_leaves_created() {
    let connector = RecordingConnector::new().refuse_connections("access denied");
    let mut session = ImportSession::new(connector.clone());
    let err = session
        .start("a.csv", import_config("a.csv", "db = \"imports\"\n"))
        .unwrap_err();
    assert!(matches!(err, ImportError::Connection { ref database, .. } if database == "imports"));
    assert_eq!(session.state(), SessionState::Created);
    assert!(matches!(
        session.process_header(&row(&["a"])),
        Err(ImportError::InvalidState { .. })
    ));
}

#[test]
fn failed_ping_closes_the_connection() {
    let connector = RecordingConnector::new().fail_ping("gone away");
    let mut session = ImportSession::new(connector.clone());
    let err = session
        .start("a.csv", import_config("a.csv", "db = \"imports\"\n"))
        .unwrap_err();
    assert!(err.to_string().contains("gone away"));
    assert_eq!(connector.closes(), 1);
}

#[test]
fn end_releases_connection_even_when_final_flush_fails() {
    let connector = RecordingConnector::new().fail_on("INSERT");
    let mut session = ImportSession::new(connector.clone());
    session
        .start("a.csv", import_config("a.csv", "db = \"imports\"\n"))
        .unwrap();
    session.process_header(&row(&["a"])).unwrap();
    session.process_line(&row(&["1"])).unwrap();
    session.process_line(&row(&["2"])).unwrap();

    let err = session.end().unwrap_err();
    assert!(matches!(err, ImportError::Write { rows: 2, .. }));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(connector.closes(), 1);

    session.close();
    drop(session);
    assert_eq!(connector.closes(), 1);
}

#[test]
fn operations_out_of_order_are_rejected() {
    let connector = RecordingConnector::new();
    let mut session = ImportSession::new(connector.clone());
    assert!(matches!(
        session.process_line(&row(&["a"])),
        Err(ImportError::InvalidState { .. })
    ));

    session
        .start("a.csv", import_config("a.csv", "db = \"imports\"\n"))
        .unwrap();
    let err = session.end().unwrap_err();
    assert_eq!(err.to_string(), "cannot end while session is connected");

    session.process_header(&row(&["a"])).unwrap();
    assert!(matches!(
        session.process_header(&row(&["a"])),
        Err(ImportError::InvalidState { .. })
    ));
    assert!(matches!(
        session.start("a.csv", import_config("a.csv", "db = \"imports\"\n")),
        Err(ImportError::InvalidState { .. })
    ));
}

#[test]
fn schema_failure_surfaces_as_schema_error() {
    let connector = RecordingConnector::new().fail_on("CREATE TABLE");
    let mut session = ImportSession::new(connector.clone());
    session
        .start("a.csv", import_config("a.csv", "db = \"imports\"\n"))
        .unwrap();
    let err = session.process_header(&row(&["a"])).unwrap_err();
    assert!(matches!(err, ImportError::Schema { action: "creating it", .. }));
    assert_eq!(session.state(), SessionState::Connected);
}
