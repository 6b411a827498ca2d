mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;

use common::{TestWorkspace, orders_csv, sales_csv, sellers_csv};

fn sqlmate(workspace: &TestWorkspace) -> Command {
    let mut cmd = Command::cargo_bin("sqlmate").expect("binary exists");
    cmd.env_remove("SQLMATE_DB")
        .env_remove("RUST_LOG")
        .arg("--db")
        .arg(workspace.db_path());
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf-8 stdout")
}

/// Second field of the first output line starting with `prefix`.
fn id_after(stdout: &str, prefix: &str) -> String {
    stdout
        .lines()
        .find(|line| line.starts_with(prefix))
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_else(|| panic!("no '{prefix}' line in:\n{stdout}"))
        .to_string()
}

#[test]
fn check_appends_row_cap() {
    let workspace = TestWorkspace::new();
    sqlmate(&workspace)
        .args(["check", "--sql", "select * from Sales;"])
        .assert()
        .success()
        .stdout(contains("select * from Sales LIMIT 200"));
}

#[test]
fn check_refuses_drop() {
    let workspace = TestWorkspace::new();
    sqlmate(&workspace)
        .args(["check", "--sql", "DROP TABLE Sales"])
        .assert()
        .failure()
        .stderr(contains("forbidden keyword \"DROP\""));
}

#[test]
fn check_reports_first_of_multiple_statements() {
    let workspace = TestWorkspace::new();
    sqlmate(&workspace)
        .args(["check", "--sql", "SELECT 1; SELECT 2"])
        .assert()
        .failure()
        .stderr(contains("first statement: SELECT 1").and(contains("multiple SQL statements")));
}

#[test]
fn probe_lists_pii_columns() {
    let workspace = TestWorkspace::new();
    let csv = workspace.write("sales.csv", &sales_csv(3));
    sqlmate(&workspace)
        .arg("probe")
        .arg("-i")
        .arg(&csv)
        .assert()
        .success()
        .stdout(
            contains("sales: 3 row(s), 3 column(s)")
                .and(contains("email"))
                .and(contains("high"))
                .and(contains("Person 2")),
        );
}

#[test]
fn load_then_query_a_single_dataset() {
    let workspace = TestWorkspace::new();
    let csv = workspace.write("Sales.csv", &sales_csv(4));

    let loaded = stdout_of(sqlmate(&workspace).arg("load").arg("-i").arg(&csv));
    assert!(loaded.contains("[pii: drop (email)]"), "{loaded}");
    let dataset_id = id_after(&loaded, "dataset ");

    sqlmate(&workspace)
        .arg("datasets")
        .assert()
        .success()
        .stdout(contains(dataset_id.as_str()).and(contains("Sales")));

    sqlmate(&workspace)
        .args([
            "query",
            "--dataset",
            dataset_id.as_str(),
            "--sql",
            "SELECT name, amount FROM Sales WHERE CAST(amount AS INTEGER) >= 300",
        ])
        .assert()
        .success()
        .stdout(
            contains("Person 2")
                .and(contains("Person 3"))
                .and(contains("Person 0").not())
                .and(contains("(2 row(s))")),
        );
}

#[test]
fn dropped_column_cannot_be_queried() {
    let workspace = TestWorkspace::new();
    let csv = workspace.write("Sales.csv", &sales_csv(2));
    let loaded = stdout_of(
        sqlmate(&workspace)
            .arg("load")
            .arg("-i")
            .arg(&csv)
            .args(["--pii-action", "drop"]),
    );
    let dataset_id = id_after(&loaded, "dataset ");

    sqlmate(&workspace)
        .args(["query", "--dataset", dataset_id.as_str(), "--sql", "SELECT email FROM Sales"])
        .assert()
        .failure()
        .stderr(contains("no such column"));
}

#[test]
fn group_load_supports_joins_and_prompts() {
    let workspace = TestWorkspace::new();
    let orders = workspace.write("Orders.csv", orders_csv());
    let sellers = workspace.write("Sellers.csv", sellers_csv());

    let loaded = stdout_of(
        sqlmate(&workspace)
            .arg("load")
            .arg("-i")
            .arg(&orders)
            .arg("-i")
            .arg(&sellers),
    );
    assert!(loaded.contains("Group_Orders_Sellers"), "{loaded}");
    let group_id = id_after(&loaded, "group ");

    sqlmate(&workspace)
        .args([
            "query",
            "--group",
            group_id.as_str(),
            "--sql",
            "SELECT s.seller_region, COUNT(*) AS orders FROM Orders o JOIN Sellers s ON o.seller_id = s.seller_id GROUP BY s.seller_region ORDER BY s.seller_region",
        ])
        .assert()
        .success()
        .stdout(contains("Busan").and(contains("Seoul")).and(contains("(2 row(s))")));

    sqlmate(&workspace)
        .args(["prompt", "--group", group_id.as_str()])
        .assert()
        .success()
        .stdout(
            contains("Table: Orders")
                .and(contains("Table: Sellers"))
                .and(contains("JOIN"))
                .and(contains("Suggested questions:")),
        );
}

#[test]
fn per_column_override_hashes_instead_of_dropping() {
    let workspace = TestWorkspace::new();
    let csv = workspace.write("Sales.csv", &sales_csv(1));
    let loaded = stdout_of(
        sqlmate(&workspace)
            .arg("load")
            .arg("-i")
            .arg(&csv)
            .args(["--action", "email=hash"]),
    );
    assert!(loaded.contains("[pii: hash (email)]"), "{loaded}");
    let dataset_id = id_after(&loaded, "dataset ");

    sqlmate(&workspace)
        .args(["query", "--dataset", dataset_id.as_str(), "--sql", "SELECT email FROM Sales"])
        .assert()
        .success()
        .stdout(contains("hash_").and(contains("example.com").not()));
}

#[test]
fn schema_registration_prints_prompt() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write(
        "shop.json",
        r#"{"tables":[{"name":"users","primaryKey":["id"],"columns":[{"name":"id","type":"INTEGER","nullable":false},{"name":"email","type":"TEXT"}]}]}"#,
    );
    sqlmate(&workspace)
        .arg("schema")
        .arg("-i")
        .arg(&schema)
        .args(["--name", "Shop"])
        .assert()
        .success()
        .stdout(
            contains("Shop")
                .and(contains("Table: users"))
                .and(contains("PRIMARY KEY: id"))
                .and(contains("id (INTEGER, NOT NULL)")),
        );
}

#[test]
fn schema_without_tables_is_refused() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("empty.json", r#"{"tables":[]}"#);
    sqlmate(&workspace)
        .arg("schema")
        .arg("-i")
        .arg(&schema)
        .assert()
        .failure()
        .stderr(contains("at least one table"));
}

#[test]
fn query_without_target_is_a_usage_error() {
    let workspace = TestWorkspace::new();
    sqlmate(&workspace)
        .args(["query", "--sql", "SELECT 1"])
        .assert()
        .failure()
        .stderr(contains("--dataset").or(contains("--group")));
}

#[test]
fn unknown_dataset_id_fails() {
    let workspace = TestWorkspace::new();
    sqlmate(&workspace)
        .args([
            "query",
            "--dataset",
            "00000000-0000-4000-8000-000000000000",
            "--sql",
            "SELECT 1",
        ])
        .assert()
        .failure()
        .stderr(contains("dataset not found"));
}
