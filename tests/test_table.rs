use ember::table::{ListTable, TableOptions};

#[test]
fn test_unique_put_replaces_value_in_place() {
    let mut tbl = ListTable::headers();
    tbl.put("Host", "a.example");
    tbl.put("Accept", "*/*");
    tbl.put("host", "b.example");

    assert_eq!(tbl.len(), 2);
    assert_eq!(tbl.get("Host"), Some("b.example"));

    // The replaced entry keeps its original position.
    let order: Vec<&str> = tbl.iter().map(|(n, _)| n).collect();
    assert_eq!(order, vec!["host", "Accept"]);
}

#[test]
fn test_case_insensitive_lookup() {
    let mut tbl = ListTable::headers();
    tbl.put("Content-Type", "text/plain");

    assert_eq!(tbl.get("content-type"), Some("text/plain"));
    assert_eq!(tbl.get("CONTENT-TYPE"), Some("text/plain"));
    assert_eq!(tbl.get("Content-Length"), None);
}

#[test]
fn test_case_sensitive_mode() {
    let mut tbl = ListTable::new(TableOptions {
        unique: true,
        case_insensitive: false,
    });
    tbl.put("key", "1");
    tbl.put("KEY", "2");

    assert_eq!(tbl.len(), 2);
    assert_eq!(tbl.get("key"), Some("1"));
    assert_eq!(tbl.get("KEY"), Some("2"));
}

#[test]
fn test_multi_mode_appends_and_get_returns_latest() {
    let mut tbl = ListTable::new(TableOptions {
        unique: false,
        case_insensitive: true,
    });
    tbl.put("Set-Cookie", "a=1");
    tbl.put("Set-Cookie", "b=2");

    assert_eq!(tbl.len(), 2);
    assert_eq!(tbl.get("set-cookie"), Some("b=2"));
    assert_eq!(tbl.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
}

#[test]
fn test_remove_drops_all_matches() {
    let mut tbl = ListTable::new(TableOptions {
        unique: false,
        case_insensitive: true,
    });
    tbl.put("X", "1");
    tbl.put("x", "2");
    tbl.put("Y", "3");

    assert_eq!(tbl.remove("X"), 2);
    assert_eq!(tbl.len(), 1);
    assert_eq!(tbl.get("Y"), Some("3"));
    assert_eq!(tbl.remove("X"), 0);
}

#[test]
fn test_iteration_preserves_insertion_order() {
    let mut tbl = ListTable::headers();
    for name in ["One", "Two", "Three", "Four"] {
        tbl.put(name, name);
    }
    let order: Vec<&str> = tbl.iter().map(|(n, _)| n).collect();
    assert_eq!(order, vec!["One", "Two", "Three", "Four"]);
}

#[test]
fn test_clear() {
    let mut tbl = ListTable::headers();
    tbl.put("A", "1");
    tbl.clear();
    assert!(tbl.is_empty());
    assert_eq!(tbl.get("A"), None);
}
