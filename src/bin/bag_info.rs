use anyhow::Result;
use bagtable::{bag::Rosbag2Reader, logging};
use std::{env, path::Path, process::exit};

fn main() {
    // Expect a bag directory or .db3 file, optionally preceded by --json.
    let args: Vec<String> = env::args().collect();
    let (json, bag) = match args.as_slice() {
        [_, bag] => (false, bag),
        [_, flag, bag] if flag == "--json" => (true, bag),
        _ => {
            eprintln!("Usage: {} [--json] <BAG>", args[0]);
            exit(1);
        }
    };
    logging::init();
    let result = if json {
        bag_info_json(Path::new(bag))
    } else {
        bag_info(Path::new(bag))
    };
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}

/// Print the same summary as one JSON document.
fn bag_info_json(path: &Path) -> Result<()> {
    let info = Rosbag2Reader::open(path)?.info()?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

/// Print duration, start time, message count and the topic list.
fn bag_info(path: &Path) -> Result<()> {
    let reader = Rosbag2Reader::open(path)?;
    let info = reader.info()?;

    println!("=== Bag: {} ===", path.display());
    println!("Storage:        {}", info.storage);
    println!("Start:          {}", info.start_time().to_rfc3339());
    println!("Duration:       {:.3} s", info.duration_secs());
    println!("Messages:       {}", info.message_count);
    println!();

    println!("=== Topics ({}) ===", info.topics.len());
    for t in &info.topics {
        println!(
            "- {:<45} | {:<40} | {:>8} msgs | {}",
            t.name, t.msg_type, t.message_count, t.serialization_format
        );
    }
    Ok(())
}
