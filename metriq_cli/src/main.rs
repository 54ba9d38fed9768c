use std::io::{self, Write};
use std::sync::Arc;

use metriq_core::error::ResolveError;
use metriq_core::evidence;
use metriq_core::intent::{IntentClassifier, KeywordClassifier};
use metriq_core::value::Value;
use metriq_core::{
    ConversationContext, CsvLoader, Dictionary, QueryEngine, QueryResult, ResolveRequest,
    SemanticResolver, TableLoader,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data".to_string());

    println!("Metriq v0.2.0 - Natural Language Metric Queries");
    println!("Data directory: {}\n", data_dir);

    let dictionary = Arc::new(Dictionary::from_default()?);
    let resolver = SemanticResolver::new(dictionary.clone());
    let classifier = KeywordClassifier::new();
    let loader = Arc::new(CsvLoader::new(&data_dir));
    let engine = QueryEngine::new(loader.clone());

    let tables = loader.list_tables();
    if tables.is_empty() {
        println!("Warning: no .csv tables found in {}", data_dir);
    } else {
        println!("Tables: {}", tables.join(", "));
    }
    println!("Metrics: {}", dictionary.list_metrics(None).join(", "));

    println!("\nReady. Commands:");
    println!("  - Type a question, e.g. 'ingresos totales este mes'");
    println!("  - BASIC <table> <question>: keyword fallback against one table");
    println!("  - TABLES: list available tables");
    println!("  - EXIT: quit\n");

    let mut context: Option<ConversationContext> = None;

    loop {
        print!("metriq> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }
        if input.eq_ignore_ascii_case("tables") {
            println!("{}", loader.list_tables().join(", "));
            continue;
        }
        if let Some(rest) = strip_prefix_ci(input, "basic ") {
            let mut parts = rest.splitn(2, ' ');
            let table = parts.next().unwrap_or_default();
            let question = parts.next().unwrap_or_default().trim();
            if table.is_empty() || question.is_empty() {
                eprintln!("Usage: BASIC <table> <question>");
                continue;
            }
            match engine.basic_execute(question, table) {
                Ok(result) => {
                    println!(
                        "[fallback, confidence {:.2}] {} row(s)",
                        result.confidence, result.row_count
                    );
                    print_table(&result.columns, &result.rows);
                }
                Err(e) => eprintln!("Fallback error: {}", e),
            }
            continue;
        }

        let classification = classifier.classify(input);
        debug!(
            intent = ?classification.intent,
            confidence = classification.confidence,
            "question classified"
        );
        let mut request = ResolveRequest::new(input).with_intent(classification.intent);
        request.available_tables = Some(loader.list_tables());
        if let Some(ctx) = &context {
            request = request.with_context(ctx.clone());
        }

        let plan = match resolver.resolve(&request) {
            Ok(plan) => plan,
            Err(ResolveError::UnresolvedMetric { suggestions, .. }) => {
                eprintln!("No metric matched (intent: {:?}).", classification.intent);
                for s in &suggestions {
                    eprintln!("  did you mean '{}' (score {:.0})?", s.metric, s.score);
                }
                eprintln!("Try the keyword fallback: BASIC <table> <question>");
                continue;
            }
            Err(ResolveError::AmbiguousMetric { candidates, .. }) => {
                eprintln!("Ambiguous question. Candidates:");
                for c in &candidates {
                    eprintln!(
                        "  {} (via '{}', score {:.0})",
                        c.metric, c.alias_matched, c.score
                    );
                }
                continue;
            }
            Err(e) => {
                eprintln!("Resolution error: {}", e);
                continue;
            }
        };

        println!(
            "Resolved: {} on {} (confidence {:.2}, {:?})",
            plan.metrics
                .iter()
                .map(|m| m.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            plan.tables.join(", "),
            plan.confidence,
            plan.operation
        );

        let query_plan = plan.to_query_plan();
        match engine.execute(&query_plan) {
            Ok(result) => {
                debug!(
                    table_id = %result.table_id,
                    cache_hit = result.cache_hit,
                    "query executed"
                );
                print_result(&result);
                let record = evidence::extract(&query_plan, &result);
                println!(
                    "Evidence: {:?}, filters [{}], columns [{}]",
                    record.operation,
                    record.filters_applied.join(", "),
                    record.columns_used.join(", ")
                );
                if !record.row_ids.is_empty() {
                    println!("Source rows: {:?}", record.row_ids);
                }
                context = Some(ConversationContext {
                    last_metric: plan.metrics.first().map(|m| m.name.clone()),
                    last_table: plan.tables.first().cloned(),
                });
            }
            Err(e) => eprintln!("Execution error: {}", e),
        }
    }

    Ok(())
}

fn strip_prefix_ci<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    let head = input.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&input[prefix.len()..])
    } else {
        None
    }
}

fn print_result(result: &QueryResult) {
    let truncated = if result.rows_truncated {
        format!(" (truncated from {})", result.rows_before_limit)
    } else {
        String::new()
    };
    println!(
        "[{}] {} row(s) in {} ms{}{}",
        result.table_id,
        result.row_count,
        result.execution_time_ms,
        if result.cache_hit { ", cached" } else { "" },
        truncated
    );
    print_table(&result.columns, &result.rows);
}

fn print_table(columns: &[String], rows: &[Vec<Value>]) {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    let rendered: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();
    for row in &rendered {
        for (i, cell) in row.iter().enumerate() {
            if cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }
    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:<width$}", c, width = w))
        .collect();
    println!("  {}", header.join(" | "));
    for row in &rendered {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = w))
            .collect();
        println!("  {}", cells.join(" | "));
    }
}
