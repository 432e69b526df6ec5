use anyhow::Result;
use arrow::util::pretty::pretty_format_batches;
use bagtable::{
    bag::Rosbag2Reader,
    logging,
    msg::SchemaSet,
    table::{topic_to_table, TopicOptions},
};
use std::{env, path::Path, process::exit};

const PREVIEW_ROWS: usize = 10;

fn main() {
    // <BAG> <TOPIC> [SCHEMA_DIR...]
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <BAG> <TOPIC> [SCHEMA_DIR...]", args[0]);
        exit(1);
    }
    logging::init();
    if let Err(e) = inspect_topic(Path::new(&args[1]), &args[2], &args[3..]) {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}

/// Convert one topic and print its Arrow schema and first rows.
fn inspect_topic(bag: &Path, topic: &str, schema_dirs: &[String]) -> Result<()> {
    let mut schemas = SchemaSet::with_builtins();
    for dir in schema_dirs {
        schemas.load_dir(dir)?;
    }
    let reader = Rosbag2Reader::open(bag)?;

    let Some(table) = topic_to_table(&reader, &schemas, topic, &TopicOptions::new())? else {
        println!("no messages on {}", topic);
        return Ok(());
    };

    println!("=== {} ({} rows) ===", topic, table.num_rows());
    for field in table.batch().schema_ref().fields() {
        println!("- {:<45} | {}", field.name(), field.data_type());
    }
    println!();

    let preview = table.batch().slice(0, table.num_rows().min(PREVIEW_ROWS));
    println!("{}", pretty_format_batches(&[preview])?);
    Ok(())
}
