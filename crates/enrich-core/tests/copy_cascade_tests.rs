use enrich_core::copy::{
    CopyContext, JsonMarshalStrategy, StrategyError, XmlFileRoundtripStrategy,
    XmlObjectGraphStrategy,
};
use enrich_core::{
    deep_copy, CopyRequest, CopyStrategy, EnrichError, Fidelity, ObjectCopier, SharedValue,
    StrategyKind, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn sample_row() -> Value {
    Value::record([
        ("id", Value::Int(7)),
        ("text", Value::from("Rust ownership explained")),
        ("score", Value::Float(0.75)),
        ("flagged", Value::Bool(false)),
        (
            "tags",
            Value::Array(vec![Value::from("lang"), Value::from("memory")]),
        ),
    ])
}

fn nested(levels: usize) -> Value {
    let mut value = Value::Int(1);
    for _ in 0..levels {
        value = Value::Array(vec![value]);
    }
    value
}

/// Counts every probe and attempt made against it.
struct CountingStrategy {
    calls: Arc<AtomicUsize>,
}

impl CopyStrategy for CountingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FastMarshal
    }

    fn fidelity(&self) -> Fidelity {
        Fidelity::Approximate
    }

    fn probe(&self, _ctx: &CopyContext<'_>) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn attempt(&self, source: &Value, _max_depth: usize) -> Result<Value, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(source.clone())
    }
}

#[test]
fn test_acyclic_values_survive_every_strategy() {
    let row = sample_row();
    let depth = row.depth().unwrap();
    let temp_dir = TempDir::new().unwrap();

    let trusted = deep_copy(&CopyRequest::new(row.clone()).with_max_depth(depth).trusted()).unwrap();
    assert_eq!(
        trusted.strategy_used,
        Some(StrategyKind::TrustedBinarySerialization)
    );
    assert!(trusted.value.structurally_eq(&row));

    let single: Vec<Box<dyn CopyStrategy>> = vec![
        Box::new(JsonMarshalStrategy),
        Box::new(XmlObjectGraphStrategy),
        Box::new(XmlFileRoundtripStrategy::in_dir(temp_dir.path())),
    ];
    for strategy in single {
        let kind = strategy.kind();
        let copier = ObjectCopier::with_strategies(vec![strategy]);
        let outcome = copier
            .copy(&CopyRequest::new(row.clone()).with_max_depth(depth))
            .unwrap();
        assert_eq!(outcome.strategy_used, Some(kind));
        assert!(
            outcome.value.structurally_eq(&row),
            "{kind} changed the value: {:?}",
            outcome.value
        );
    }
}

#[test]
fn test_copy_is_detached_from_source() {
    let cell = Value::shared(Value::from("original"));
    let row = Value::record([("text", cell.clone())]);

    for request in [
        CopyRequest::new(row.clone()).trusted(),
        CopyRequest::new(row.clone()),
    ] {
        let copy = deep_copy(&request).unwrap().value;
        if let Value::Shared(shared) = &cell {
            shared.set(Value::from("mutated"));
        }
        let text = enrich_core::get_field(&copy, "text").unwrap();
        assert_eq!(text.to_text().as_deref(), Some("original"));
        if let Value::Shared(shared) = &cell {
            shared.set(Value::from("original"));
        }
    }
}

#[test]
fn test_null_source_invokes_no_strategy() {
    let calls = Arc::new(AtomicUsize::new(0));
    let copier = ObjectCopier::with_strategies(vec![Box::new(CountingStrategy {
        calls: calls.clone(),
    })]);

    for request in [
        CopyRequest::new(Value::Null),
        CopyRequest::new(Value::Null).trusted(),
        CopyRequest::new(Value::Null).with_max_depth(40),
        CopyRequest::new(Value::Null).with_max_depth(0),
    ] {
        let outcome = copier.copy(&request).unwrap();
        assert!(outcome.value.is_null());
        assert_eq!(outcome.strategy_used, None);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_depth_truncation_unless_trusted() {
    let deep = Value::record([(
        "l1",
        Value::record([("l2", Value::record([("l3", Value::record([("leaf", Value::Int(1))]))]))]),
    )]);
    assert_eq!(deep.depth(), Some(4));
    let truncated = Value::record([("l1", Value::record([("l2", Value::Null)]))]);

    let untrusted = deep_copy(&CopyRequest::new(deep.clone())).unwrap();
    assert_eq!(untrusted.strategy_used, Some(StrategyKind::FastMarshal));
    assert_eq!(untrusted.fidelity, Fidelity::Approximate);
    assert_eq!(untrusted.value, truncated);

    let xml = ObjectCopier::with_strategies(vec![Box::new(XmlObjectGraphStrategy)])
        .copy(&CopyRequest::new(deep.clone()))
        .unwrap();
    assert_eq!(xml.value, truncated);

    let trusted = deep_copy(&CopyRequest::new(deep.clone()).trusted()).unwrap();
    assert_eq!(trusted.fidelity, Fidelity::Exact);
    assert_eq!(trusted.value, deep);
}

#[test]
fn test_untrusted_source_never_uses_binary_snapshot() {
    let row = sample_row();
    assert!(row.is_serializable());
    for depth in 1..=4 {
        let outcome = deep_copy(&CopyRequest::new(row.clone()).with_max_depth(depth)).unwrap();
        assert_ne!(
            outcome.strategy_used,
            Some(StrategyKind::TrustedBinarySerialization)
        );
    }
}

#[test]
fn test_shallow_copy_drops_nested_record() {
    let source = Value::record([
        ("a", Value::Int(1)),
        ("b", Value::record([("c", Value::Int(2))])),
    ]);
    let outcome = deep_copy(&CopyRequest::new(source).with_max_depth(1)).unwrap();

    assert_eq!(outcome.strategy_used, Some(StrategyKind::FastMarshal));
    assert_eq!(enrich_core::get_field(&outcome.value, "a"), Some(Value::Int(1)));
    let b = enrich_core::get_field(&outcome.value, "b");
    assert!(matches!(b, None | Some(Value::Null)));
}

#[test]
fn test_cascade_falls_through_to_xml() {
    let value = nested(200);
    let outcome = deep_copy(&CopyRequest::new(value.clone()).with_max_depth(500)).unwrap();
    assert_eq!(outcome.strategy_used, Some(StrategyKind::XmlObjectGraph));
    assert_eq!(outcome.value, value);
}

#[test]
fn test_failed_cascade_retries_at_default_depth() {
    let temp_dir = TempDir::new().unwrap();
    let copier = ObjectCopier::with_temp_dir(temp_dir.path());

    let outcome = copier
        .copy(&CopyRequest::new(nested(300)).with_max_depth(400))
        .unwrap();
    assert_eq!(outcome.strategy_used, Some(StrategyKind::FastMarshal));
    assert_eq!(outcome.value, Value::Array(vec![Value::Array(vec![Value::Null])]));
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_exhausted_cascade_reports_every_failure() {
    struct AlwaysFails;
    impl CopyStrategy for AlwaysFails {
        fn kind(&self) -> StrategyKind {
            StrategyKind::XmlFileRoundtrip
        }
        fn fidelity(&self) -> Fidelity {
            Fidelity::Approximate
        }
        fn probe(&self, _ctx: &CopyContext<'_>) -> bool {
            true
        }
        fn attempt(&self, _source: &Value, _max_depth: usize) -> Result<Value, StrategyError> {
            Err(StrategyError::Io(std::io::Error::other("disk full")))
        }
    }

    let copier = ObjectCopier::with_strategies(vec![Box::new(AlwaysFails)]);
    let err = copier.copy(&CopyRequest::new(sample_row())).unwrap_err();
    match err {
        EnrichError::CopyExhausted { depth, failures } => {
            assert_eq!(depth, 2);
            assert_eq!(failures.len(), 1);
            assert!(failures[0].reason.contains("disk full"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = copier
        .copy(&CopyRequest::new(sample_row()).with_max_depth(5))
        .unwrap_err();
    let message = err.to_string();
    match err {
        EnrichError::CopyExhausted { depth, failures } => {
            assert_eq!(depth, 2);
            assert_eq!(
                failures.iter().map(|f| f.max_depth).collect::<Vec<_>>(),
                vec![5, 2]
            );
            assert!(failures.iter().all(|f| f.strategy == StrategyKind::XmlFileRoundtrip));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(message.contains("xml-file at depth 5: "));
    assert!(message.contains("xml-file at depth 2: "));
}

#[test]
fn test_self_aliasing_cell_copies_to_null() {
    let cell = SharedValue::new(Value::Null);
    cell.set(Value::Shared(cell.clone()));

    let outcome = deep_copy(&CopyRequest::new(Value::Shared(cell.clone()))).unwrap();
    assert_eq!(outcome.strategy_used, Some(StrategyKind::FastMarshal));
    assert!(outcome.value.is_null());

    let row = Value::record([("id", Value::Int(1)), ("text", Value::Shared(cell))]);
    let outcome = deep_copy(&CopyRequest::new(row)).unwrap();
    assert_eq!(
        outcome.value,
        Value::record([("id", Value::Int(1)), ("text", Value::Null)])
    );
}

#[test]
fn test_zero_depth_is_rejected() {
    let err = deep_copy(&CopyRequest::new(sample_row()).with_max_depth(0)).unwrap_err();
    assert!(matches!(err, EnrichError::InvalidArgument(_)));
}
