//! Structural extraction over realistic canonical and tenant queries

use tenantql_sql::{normalized_tokens, Statement, TokenKind};

#[test]
fn canonical_query_with_filter() {
    let stmt = Statement::parse("SELECT contract_id, status FROM contracts WHERE status='active'").unwrap();

    assert_eq!(stmt.tables().len(), 1);
    assert_eq!(stmt.tables()[0].name, "contracts");
    let bare: Vec<String> = stmt.bare_columns().into_iter().map(|c| c.column).collect();
    assert_eq!(bare, vec!["contract_id", "status", "status"]);
    assert!(!stmt.has_join());
    assert!(!stmt.has_aggregation());
    assert!(!stmt.has_subquery());
}

#[test]
fn generated_tenant_query_with_join_and_case() {
    let sql = r#"
        SELECT a.generated_unique_award_id AS contract_id,
               CASE WHEN a.period_end>=CURRENT_DATE AND a.period_start<=CURRENT_DATE
                    THEN 'active' ELSE 'inactive' END AS status,
               r.legal_name
        FROM awards a
        LEFT JOIN recipients r ON a.recipient_id = r.id
        WHERE a.total_obligation > 1000
        ORDER BY a.period_end DESC
    "#;
    let stmt = Statement::parse(sql).unwrap();

    let tables: Vec<(&str, Option<&str>)> = stmt
        .tables()
        .iter()
        .map(|t| (t.name.as_str(), t.alias.as_deref()))
        .collect();
    assert_eq!(tables, vec![("awards", Some("a")), ("recipients", Some("r"))]);

    let qualified = stmt.qualified_columns();
    assert_eq!(qualified.len(), 8);
    assert!(qualified
        .iter()
        .all(|c| stmt.resolve_qualifier(c.qualifier.as_deref().unwrap()).is_some()));
    assert!(stmt.bare_columns().is_empty());

    let items = stmt.select_items();
    assert_eq!(items.len(), 3);
    assert_eq!(stmt.item_alias(&items[1]).as_deref(), Some("status"));
    assert_eq!(stmt.output_aliases(), vec!["contract_id", "status"]);
}

#[test]
fn comments_and_strings_are_not_structure() {
    let stmt = Statement::parse(
        "SELECT title -- FROM fake_table\nFROM contracts WHERE title = 'FROM other JOIN x'",
    )
    .unwrap();
    assert_eq!(stmt.tables().len(), 1);
    assert!(!stmt.has_join());
    assert!(stmt
        .tokens()
        .iter()
        .any(|t| t.kind == TokenKind::Comment && t.text.contains("fake_table")));
}

#[test]
fn in_subquery_tables_are_collected() {
    let stmt = Statement::parse(
        "SELECT name FROM parties WHERE party_id IN (SELECT buyer_party_id FROM contracts)",
    )
    .unwrap();
    let names: Vec<&str> = stmt.tables().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["parties", "contracts"]);
    assert!(stmt.has_subquery());
}

#[test]
fn normalized_tokens_drop_comments() {
    assert_eq!(
        normalized_tokens("a /* x */ + -- y\n b").unwrap(),
        vec!["a", "+", "b"]
    );
}
