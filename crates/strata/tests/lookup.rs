//! Lookups against hierarchies written to temporary directories

use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use strata::explain::Event;
use strata::{object, ExplainTree, Function, LookupError, LookupOptions, Session, SessionOptions, Value};

struct Hierarchy {
    dir: tempfile::TempDir,
}

impl Hierarchy {
    fn new(config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("strata.yaml"), config).unwrap();
        Self { dir }
    }

    fn file(self, path: &str, contents: &str) -> Self {
        let path = self.dir.path().join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
        self
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn session(&self, options: SessionOptions) -> Session {
        Session::new(options.with_config_root(self.root())).unwrap()
    }
}

const LAYERED: &str = r#"
version: 5
hierarchy:
  - name: "Per node"
    path: "nodes/%{node}.yaml"
  - name: "Common"
    path: "common.yaml"
"#;

fn layered() -> Hierarchy {
    Hierarchy::new(LAYERED)
        .file(
            "data/nodes/web1.yaml",
            r#"
ntp_servers: [ntp1.example.com]
motd: "welcome to %{node} in %{lookup('datacenter')}"
users:
  alice:
    groups: [wheel, web]
settings:
  log_level: debug
"#,
        )
        .file(
            "data/common.yaml",
            r#"
datacenter: fra1
ntp_servers: [ntp0.example.com, ntp1.example.com]
settings:
  log_level: info
  retention: 7
users:
  bob:
    groups: [ops]
"#,
        )
}

fn lookup(session: &Session, key: &str) -> Result<Option<Value>, LookupError> {
    strata::lookup(session, key, &LookupOptions::default(), None)
}

fn web1() -> SessionOptions {
    SessionOptions::default().with_scope_var("node", "web1")
}

#[test]
fn first_found_wins() {
    let hierarchy = layered();
    let session = hierarchy.session(web1());
    assert_eq!(lookup(&session, "datacenter").unwrap(), Some(Value::from("fra1")));
    assert_eq!(
        lookup(&session, "settings").unwrap(),
        Some(object! { "log_level" => "debug" })
    );

    let session = hierarchy.session(SessionOptions::default().with_scope_var("node", "db1"));
    assert_eq!(
        lookup(&session, "settings").unwrap(),
        Some(object! { "log_level" => "info", "retention" => 7 })
    );
}

#[test]
fn explicit_merge_strategies() {
    let hierarchy = layered();
    let session = hierarchy.session(web1());

    let unique = LookupOptions::default().with_merge("unique");
    assert_eq!(
        strata::lookup(&session, "ntp_servers", &unique, None).unwrap(),
        Some(Value::from(vec!["ntp1.example.com", "ntp0.example.com"]))
    );

    let hash = LookupOptions::default().with_merge("hash");
    assert_eq!(
        strata::lookup(&session, "settings", &hash, None).unwrap(),
        Some(object! { "log_level" => "debug", "retention" => 7 })
    );
    assert!(matches!(
        strata::lookup(&session, "datacenter", &hash, None),
        Err(LookupError::MergeTypeMismatch { strategy: "hash", found: "string" })
    ));

    let deep = LookupOptions::default().with_merge("deep");
    assert_eq!(
        strata::lookup(&session, "users", &deep, None).unwrap(),
        Some(object! {
            "alice" => object! { "groups" => vec!["wheel", "web"] },
            "bob" => object! { "groups" => vec!["ops"] },
        })
    );
}

#[test]
fn lookup_options_select_the_strategy() {
    let hierarchy = Hierarchy::new(LAYERED)
        .file(
            "data/nodes/web1.yaml",
            r#"
lookup_options:
  packages:
    merge:
      strategy: deep
      knockout_prefix: "--"
packages:
  base: ["--telnet", vim]
  web: nginx
  db: "--"
"#,
        )
        .file(
            "data/common.yaml",
            r#"
lookup_options:
  classes:
    merge: unique
packages:
  base: [telnet, curl, "--color"]
  db: postgres
classes: [base]
"#,
        )
        .file("data/nodes/db1.yaml", "classes: [db]\n");

    let session = hierarchy.session(web1());
    assert_eq!(
        lookup(&session, "packages").unwrap(),
        Some(object! {
            "base" => vec!["vim", "curl", "--color"],
            "web" => "nginx",
        })
    );
    // an explicit strategy wins over lookup_options
    assert_eq!(
        strata::lookup(&session, "packages", &LookupOptions::default().with_merge("first"), None).unwrap(),
        Some(object! { "base" => vec!["--telnet", "vim"], "web" => "nginx", "db" => "--" })
    );

    let session = hierarchy.session(SessionOptions::default().with_scope_var("node", "db1"));
    assert_eq!(lookup(&session, "classes").unwrap(), Some(Value::from(vec!["db", "base"])));
    assert_eq!(lookup(&session, "lookup_options").unwrap(), None);
}

#[test]
fn default_merge_strategy_of_an_invocation() {
    let hierarchy = layered();
    let session = hierarchy.session(web1());
    let mut ic = session.invocation(None, None);
    ic.set_default_merge_strategy(Some(strata::MergeStrategy::Hash));
    let key = strata::Key::parse("settings").unwrap();
    assert_eq!(
        ic.lookup(&key, &LookupOptions::default()).unwrap(),
        Some(object! { "log_level" => "debug", "retention" => 7 })
    );
}

#[test]
fn interpolation_and_digging() {
    let hierarchy = layered();
    let session = hierarchy.session(web1());
    assert_eq!(
        lookup(&session, "motd").unwrap(),
        Some(Value::from("welcome to web1 in fra1"))
    );
    assert_eq!(lookup(&session, "users.alice.groups[1]").unwrap(), Some(Value::from("web")));
    assert_eq!(lookup(&session, "users.alice.groups.0").unwrap(), Some(Value::from("wheel")));
    assert_eq!(lookup(&session, "users.alice.groups[5]").unwrap(), None);
    assert_eq!(lookup(&session, "users.carol").unwrap(), None);
    assert_eq!(lookup(&session, "datacenter.name").unwrap(), None);
    assert_eq!(lookup(&session, "missing").unwrap(), None);
}

fn interpolated_layers() -> Hierarchy {
    Hierarchy::new(LAYERED)
        .file(
            "data/nodes/web1.yaml",
            r#"
servers: ["%{env}", backup]
ports:
  "%{env}": 1
  "%{node}": 10
limits:
  "%{env}": {cpu: 2}
"#,
        )
        .file(
            "data/common.yaml",
            r#"
servers: [prod, "%{lookup('fallback')}"]
fallback: backup
ports:
  prod: 2
  dev: 3
limits:
  prod: {cpu: 1, memory: "%{lookup('fallback')}"}
"#,
        )
}

#[test]
fn merge_candidates_are_interpolated_first() {
    let hierarchy = interpolated_layers();
    let session = hierarchy.session(web1().with_scope_var("env", "prod"));

    let unique = LookupOptions::default().with_merge("unique");
    assert_eq!(
        strata::lookup(&session, "servers", &unique, None).unwrap(),
        Some(Value::from(vec!["prod", "backup"]))
    );

    let hash = LookupOptions::default().with_merge("hash");
    assert_eq!(
        strata::lookup(&session, "ports", &hash, None).unwrap(),
        Some(object! { "prod" => 1, "web1" => 10, "dev" => 3 })
    );

    let deep = LookupOptions::default().with_merge("deep");
    assert_eq!(
        strata::lookup(&session, "limits", &deep, None).unwrap(),
        Some(object! { "prod" => object! { "cpu" => 2, "memory" => "backup" } })
    );
    assert_eq!(
        strata::lookup(&session, "limits.prod.memory", &deep, None).unwrap(),
        Some(Value::from("backup"))
    );
}

#[test]
fn invocation_scope_shadows_the_session_scope() {
    let hierarchy = layered();
    let session = hierarchy.session(web1());
    let mut vars = strata::Map::new();
    vars.insert("node".into(), Value::from("db1"));

    let mut ic = session.invocation(Some(vars), None);
    let key = strata::Key::parse("settings").unwrap();
    assert_eq!(
        ic.lookup(&key, &LookupOptions::default()).unwrap(),
        Some(object! { "log_level" => "info", "retention" => 7 })
    );
}

#[test]
fn cyclic_references_fail() {
    let hierarchy = Hierarchy::new(LAYERED).file(
        "data/common.yaml",
        r#"
a: "%{lookup('b')}"
b: "x-%{lookup('c')}"
c: "%{alias('a')}"
self: "%{hiera('self')}"
"#,
    );
    let session = hierarchy.session(web1());

    match lookup(&session, "a") {
        Err(LookupError::CyclicLookup { chain }) => assert_eq!(chain, vec!["a", "b", "c", "a"]),
        other => panic!("expected a cyclic lookup, got {other:?}"),
    }
    let error = lookup(&session, "self").unwrap_err();
    assert_eq!(error.to_string(), "recursive lookup detected in [self, self]");
}

#[test]
fn module_name_selects_locations() {
    let hierarchy = Hierarchy::new(
        r#"
version: 5
hierarchy:
  - name: "Module"
    path: "modules/%{module_name}.yaml"
"#,
    )
    .file("data/modules/web.yaml", "port: 8080\n")
    .file("data/modules/db.yaml", "port: 5432\n");
    let session = hierarchy.session(SessionOptions::default());

    let web = LookupOptions::default().with_module_name("web");
    let db = LookupOptions::default().with_module_name("db");
    assert_eq!(strata::lookup(&session, "port", &web, None).unwrap(), Some(Value::from(8080)));
    assert_eq!(strata::lookup(&session, "port", &db, None).unwrap(), Some(Value::from(5432)));
}

#[test]
fn sub_lookups_keep_the_module_context() {
    let hierarchy = Hierarchy::new(
        r#"
version: 5
hierarchy:
  - name: "Module"
    path: "modules/%{module_name}.yaml"
  - name: "Common"
    path: "common.yaml"
"#,
    )
    .file(
        "data/modules/web.yaml",
        "a: \"%{lookup('b')}\"\nb: from-module\nc: \"%{alias('a')}\"\n",
    )
    .file("data/common.yaml", "b: from-common\nd: \"%{lookup('b')}\"\n");
    let session = hierarchy.session(SessionOptions::default());

    let web = LookupOptions::default().with_module_name("web");
    assert_eq!(strata::lookup(&session, "a", &web, None).unwrap(), Some(Value::from("from-module")));
    assert_eq!(strata::lookup(&session, "c", &web, None).unwrap(), Some(Value::from("from-module")));
    assert_eq!(strata::lookup(&session, "d", &web, None).unwrap(), Some(Value::from("from-module")));
    assert_eq!(
        strata::lookup(&session, "d", &LookupOptions::default(), None).unwrap(),
        Some(Value::from("from-common"))
    );
}

#[test]
fn built_in_functions() {
    std::env::set_var("STRATA_TEST_BUILT_IN_FUNCTIONS", "from-env");
    let hierarchy = Hierarchy::new(
        r#"
version: 5
hierarchy:
  - name: "Json"
    data_hash: json_data
    paths: ["a.json", "b.json"]
  - name: "Env"
    lookup_key: environment
  - name: "Scope"
    lookup_key: scope_data
"#,
    )
    .file("data/a.json", r#"{"json_key": {"nested": [1, 2]}}"#);
    let session = hierarchy.session(SessionOptions::default().with_scope_var("scoped", true));

    assert_eq!(
        lookup(&session, "json_key.nested[1]").unwrap(),
        Some(Value::from(2))
    );
    assert_eq!(
        lookup(&session, "STRATA_TEST_BUILT_IN_FUNCTIONS").unwrap(),
        Some(Value::from("from-env"))
    );
    assert_eq!(lookup(&session, "scoped").unwrap(), Some(Value::from(true)));
}

#[test]
fn provider_failures_propagate() {
    let hierarchy = layered().file("data/nodes/web1.yaml", "key: [unterminated\n");
    let session = hierarchy.session(web1());
    assert!(matches!(
        lookup(&session, "datacenter"),
        Err(LookupError::Provider { .. })
    ));

    let hierarchy = Hierarchy::new("hierarchy: [{name: x, data_hash: no_such_function}]");
    let session = hierarchy.session(SessionOptions::default());
    assert!(matches!(
        lookup(&session, "anything"),
        Err(LookupError::Configuration(strata::ConfigError::UnknownFunction(_)))
    ));
}

#[test]
fn explain_reports_the_search() {
    let hierarchy = layered();
    let session = hierarchy.session(SessionOptions::default().with_scope_var("node", "db1"));
    let tree = Arc::new(ExplainTree::new());

    let found = strata::lookup(&session, "datacenter", &LookupOptions::default(), Some(tree.clone())).unwrap();
    assert_eq!(found, Some(Value::from("fra1")));

    let rendered = tree.render();
    let common = hierarchy.root().join("data/common.yaml");
    let expected = format!(
        "Searching for \"datacenter\"\n\
         \x20 Merge strategy \"first\"\n\
         \x20   Data Provider \"Per node\"\n\
         \x20     Location \"{}\"\n\
         \x20       Location not found\n\
         \x20   Data Provider \"Common\"\n\
         \x20     Location \"{}\"\n\
         \x20       Found key: \"datacenter\" value: \"fra1\"\n\
         \x20   Merged result: \"fra1\"\n",
        hierarchy.root().join("data/nodes/db1.yaml").display(),
        common.display(),
    );
    assert_eq!(rendered, expected);
}

#[test]
fn sensitive_values_are_redacted() {
    let hierarchy = Hierarchy::new(
        r#"
version: 5
hierarchy:
  - name: "Common"
    path: "common.yaml"
  - name: "Vault"
    lookup_key: vault
"#,
    )
    .file(
        "data/common.yaml",
        r#"
lookup_options:
  db_password:
    convert_to: Sensitive
  port:
    convert_to: [Integer, 16]
port: "1f90"
"#,
    );
    let vault = Function::lookup_key(|ctx, key| match key {
        "db_password" => {
            ctx.explain(|| "vault answered hunter2".to_string());
            Ok(Some(Value::from("hunter2")))
        }
        _ => Err(ctx.not_found()),
    });
    let session = hierarchy.session(SessionOptions::default().with_function("vault", vault));
    let tree = Arc::new(ExplainTree::new());

    let found = strata::lookup(&session, "db_password", &LookupOptions::default(), Some(tree.clone())).unwrap();
    assert_eq!(found, Some(Value::from("hunter2").into_sensitive()));
    assert_eq!(found.unwrap().to_string(), strata::value::REDACTED);

    assert!(tree.events().iter().any(|event| matches!(event, Event::Found { .. })));
    for event in tree.events() {
        assert!(!event.to_string().contains("hunter2"), "leaked in {event}");
    }
    assert!(!tree.render().contains("hunter2"));

    assert_eq!(lookup(&session, "port").unwrap(), Some(Value::from(8080)));
}
