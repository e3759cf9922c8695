use clap::Parser;

use crate::{
  planner::{SortDirection, SortSpec},
  utils::version,
};

#[derive(Parser, Debug)]
#[command(author, version = version(), about)]
pub struct Cli {
  #[arg(
    short('u'),
    long = "url",
    value_name = "URL",
    help = "Connection url (postgres://, postgresql://, mysql:// or mariadb://). Falls back to DATABASE_URL"
  )]
  pub url: Option<String>,

  #[arg(short('t'), long = "table", value_name = "TABLE", help = "Table to browse")]
  pub table: String,

  #[arg(
    short('s'),
    long = "schema",
    value_name = "SCHEMA",
    help = "Schema (Postgres) or database (MySQL) of the table"
  )]
  pub schema: Option<String>,

  #[arg(short('p'), long = "page", value_name = "PAGE", help = "1-based page number", default_value_t = 1)]
  pub page: u64,

  #[arg(long = "page-size", value_name = "ROWS", help = "Rows per page, overrides the configured page size")]
  pub page_size: Option<u64>,

  #[arg(long = "sort", value_name = "COLUMN", help = "Column to order by")]
  pub sort: Option<String>,

  #[arg(long = "desc", help = "Sort descending", requires = "sort")]
  pub desc: bool,

  #[arg(long = "exact-count", help = "Run COUNT(*) even when the table is large enough to use an estimate")]
  pub exact_count: bool,

  #[arg(long = "structure", help = "Print the column structure instead of rows")]
  pub structure: bool,
}

impl Cli {
  pub fn connection_url(&self) -> Result<String, String> {
    self
      .url
      .clone()
      .or_else(|| std::env::var("DATABASE_URL").ok())
      .filter(|url| !url.trim().is_empty())
      .ok_or_else(|| "no connection url given; pass --url or set DATABASE_URL".to_string())
  }

  pub fn sort_spec(&self) -> Option<SortSpec> {
    let direction = if self.desc { SortDirection::Desc } else { SortDirection::Asc };
    self.sort.as_ref().map(|column| SortSpec { column: column.clone(), direction })
  }
}
