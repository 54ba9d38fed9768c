use std::sync::Arc;

use metriq_core::evidence::{self, OperationKind};
use metriq_core::frame::Frame;
use metriq_core::plan::PlanOperation;
use metriq_core::value::Value;
use metriq_core::{
    Dictionary, MemoryLoader, QueryEngine, ResolveRequest, SemanticResolver, TableLoader,
};

fn orders_frame() -> Frame {
    Frame::new(
        "orders",
        vec![
            "ORDER_ID".to_string(),
            "ORDER_DATE".to_string(),
            "ORDER_AMOUNT".to_string(),
            "ORDER_STATUS".to_string(),
        ],
        vec![
            vec![
                Value::Integer(1),
                Value::Text("2025-11-20".to_string()),
                Value::Float(20.0),
                Value::Text("delivered".to_string()),
            ],
            vec![
                Value::Integer(2),
                Value::Text("2025-12-05".to_string()),
                Value::Float(10.0),
                Value::Text("delivered".to_string()),
            ],
            vec![
                Value::Integer(3),
                Value::Text("2025-12-10".to_string()),
                Value::Float(30.0),
                Value::Text("delivered".to_string()),
            ],
            vec![
                Value::Integer(4),
                Value::Text("2025-11-02".to_string()),
                Value::Float(99.0),
                Value::Text("cancelled".to_string()),
            ],
        ],
    )
}

fn listening_frame() -> Frame {
    let mut rows = Vec::new();
    let plays = [
        ("Bad Bunny", 3),
        ("Rosalia", 2),
        ("Quevedo", 1),
    ];
    let mut id = 0i64;
    for (artist, n) in plays {
        for _ in 0..n {
            id += 1;
            rows.push(vec![
                Value::Integer(id),
                Value::Text(artist.to_string()),
            ]);
        }
    }
    Frame::new(
        "listening_history",
        vec!["PLAY_ID".to_string(), "ARTIST_NAME".to_string()],
        rows,
    )
}

fn setup() -> (SemanticResolver, QueryEngine, Arc<MemoryLoader>) {
    let dictionary = Arc::new(Dictionary::from_default().unwrap());
    let resolver = SemanticResolver::new(dictionary);
    let loader = Arc::new(
        MemoryLoader::new()
            .with_table(orders_frame())
            .with_table(listening_frame()),
    );
    let engine = QueryEngine::new(loader.clone());
    (resolver, engine, loader)
}

fn request(question: &str, loader: &MemoryLoader) -> ResolveRequest {
    let mut request = ResolveRequest::new(question);
    request.available_tables = Some(loader.list_tables());
    request
}

#[test]
fn test_revenue_question_end_to_end() {
    let (resolver, engine, loader) = setup();

    let plan = resolver
        .resolve(&request("ingresos totales", &loader))
        .unwrap();
    assert_eq!(plan.metrics[0].name, "total_revenue");
    assert_eq!(plan.tables, vec!["orders".to_string()]);
    assert!(plan.confidence > 0.9);

    let query_plan = plan.to_query_plan();
    let result = engine.execute(&query_plan).unwrap();

    // The cancelled order is excluded by the metric's own filter.
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0][0], Value::Float(60.0));
    assert!(result.table_id.starts_with("t_"));
    assert!(!result.cache_hit);

    let record = evidence::extract(&query_plan, &result);
    assert_eq!(record.operation, OperationKind::AggregateSum);
    assert!(record.columns_used.iter().any(|c| c == "ORDER_AMOUNT"));
    assert_eq!(record.filters_applied.len(), 1);
}

#[test]
fn test_repeated_question_hits_cache_without_reloading() {
    let (resolver, engine, loader) = setup();

    let plan = resolver
        .resolve(&request("ingresos totales", &loader))
        .unwrap()
        .to_query_plan();

    let first = engine.execute(&plan).unwrap();
    let second = engine.execute(&plan).unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.rows, second.rows);
    assert_eq!(first.table_id, second.table_id);
    assert_eq!(loader.load_count(), 1);
}

#[test]
fn test_month_comparison_buckets_both_periods() {
    let (resolver, engine, loader) = setup();

    let plan = resolver
        .resolve(&request("ingresos este mes vs mes pasado", &loader))
        .unwrap();
    assert_eq!(plan.group_by, vec!["ORDER_DATE__month".to_string()]);

    let result = engine.execute(&plan.to_query_plan()).unwrap();

    // Anchor is 2025-12-10, the newest delivered order.
    assert_eq!(result.columns[0], "ORDER_DATE__month");
    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows[0][0], Value::Text("2025-11".to_string()));
    assert_eq!(result.rows[0][1], Value::Float(20.0));
    assert_eq!(result.rows[1][0], Value::Text("2025-12".to_string()));
    assert_eq!(result.rows[1][1], Value::Float(40.0));
}

#[test]
fn test_ranking_question_end_to_end() {
    let (resolver, engine, loader) = setup();

    let plan = resolver
        .resolve(&request("top 2 artistas mas escuchados", &loader))
        .unwrap();
    assert_eq!(plan.operation, PlanOperation::Rank);
    assert_eq!(plan.tables, vec!["listening_history".to_string()]);
    assert_eq!(plan.limit, Some(2));

    let query_plan = plan.to_query_plan();
    let result = engine.execute(&query_plan).unwrap();

    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows[0][0], Value::Text("Bad Bunny".to_string()));
    assert_eq!(result.rows[0][1], Value::Integer(3));
    assert_eq!(result.rows[1][0], Value::Text("Rosalia".to_string()));
    assert_eq!(result.rows[1][1], Value::Integer(2));
    assert!(result.rows_truncated);

    let record = evidence::extract(&query_plan, &result);
    assert_eq!(record.operation, OperationKind::Rank);
}

#[test]
fn test_fallback_count_keeps_low_confidence() {
    let (_, engine, _) = setup();

    let result = engine
        .basic_execute("cuantas filas hay", "orders")
        .unwrap();

    assert!(result.is_fallback);
    assert!(result.confidence <= 0.7);
    assert_eq!(result.rows[0][0], Value::Integer(4));
}

#[test]
fn test_result_can_be_fetched_again_by_table_id() {
    let (resolver, engine, loader) = setup();

    let plan = resolver
        .resolve(&request("ingresos totales", &loader))
        .unwrap()
        .to_query_plan();
    let result = engine.execute(&plan).unwrap();

    let fetched = engine.result_by_id(&result.table_id).unwrap();
    assert_eq!(fetched.rows, result.rows);
}
