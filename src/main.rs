use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use serde_json::Value;
use table_crafter::{
  cli::Cli,
  config::Config,
  models::TableRef,
  sql,
  utils::{initialize_logging, initialize_panic_handler},
  view::TableView,
};

async fn tokio_main() -> Result<()> {
  initialize_logging()?;

  initialize_panic_handler()?;

  let args = Cli::parse();
  let url = args.connection_url().map_err(|e| eyre!(e))?;

  let mut config = Config::new()?;
  if let Some(page_size) = args.page_size {
    config.page_size = page_size;
  }

  let table = match &args.schema {
    Some(schema) => TableRef::with_schema(args.table.clone(), schema.clone()),
    None => TableRef::new(args.table.clone()),
  };

  let executor = sql::connect(&url).await?;
  let mut view = TableView::new(executor, table, config);
  view.load_structure().await?;

  if args.structure {
    print_structure(&view);
    return Ok(());
  }

  view.set_sort(args.sort_spec());
  view.set_page(args.page);
  view.load_page().await?;
  if args.exact_count && view.pagination().is_estimated_count {
    view.request_exact_count().await?;
  }

  print_page(&view);
  Ok(())
}

fn render(value: &Value) -> String {
  match value {
    Value::Null => "NULL".to_string(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn print_page(view: &TableView) {
  let result = view.result();
  let header: Vec<&str> = result.fields.iter().map(|f| f.name.as_str()).collect();
  println!("{}", header.join("\t"));
  for row in &result.rows {
    println!("{}", row.iter().map(render).collect::<Vec<_>>().join("\t"));
  }

  let pagination = view.pagination();
  let approx = if pagination.is_estimated_count { "~" } else { "" };
  println!(
    "\npage {} of {approx}{} ({approx}{} rows, {} ms)",
    pagination.page, pagination.total_pages, pagination.total_rows, result.execution_time_ms
  );
}

fn print_structure(view: &TableView) {
  for column in &view.structure().columns {
    let mut flags = Vec::new();
    if column.is_primary_key {
      flags.push("PK".to_string());
    }
    if column.is_auto_increment {
      flags.push("AUTO".to_string());
    }
    if !column.nullable {
      flags.push("NOT NULL".to_string());
    }
    if let Some(default) = &column.default_value {
      flags.push(format!("DEFAULT {default}"));
    }
    println!("{}\t{}\t{}", column.name, column.data_type, flags.join(" "));
  }
  for index in &view.structure().indexes {
    println!("index {} ({}){}", index.name, index.columns.join(", "), if index.is_unique { " unique" } else { "" });
  }
  for fk in &view.structure().foreign_keys {
    println!(
      "foreign key {} ({}) -> {} ({})",
      fk.name,
      fk.columns.join(", "),
      fk.referenced_table,
      fk.referenced_columns.join(", ")
    );
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  if let Err(e) = tokio_main().await {
    eprintln!("{} error: Something went wrong", env!("CARGO_PKG_NAME"));
    Err(e)
  } else {
    Ok(())
  }
}
