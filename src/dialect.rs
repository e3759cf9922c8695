use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

static NUMERIC_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?([eE][-+]?\d+)?$").unwrap());

static COMMON_KEYWORD: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)^(NULL|TRUE|FALSE|CURRENT_TIMESTAMP|CURRENT_DATE|CURRENT_TIME|LOCALTIME|LOCALTIMESTAMP|NOW\(\))$")
    .unwrap()
});

static MYSQL_LITERAL: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)^(CURRENT_TIMESTAMP\(\d\)|NOW\(\d\)|UUID\(\)|CURDATE\(\)|CURTIME\(\)|b'[01]+'|x'[0-9a-f]+')$")
    .unwrap()
});

static POSTGRES_LITERAL: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"(?i)^(gen_random_uuid\(\)|uuid_generate_v4\(\)|CURRENT_TIMESTAMP\(\d\)|now\(\)|nextval\('[A-Za-z0-9_.]+'(::regclass)?\))(::[A-Za-z_ ]+)?$",
  )
  .unwrap()
});

static SAFE_IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// SQL flavour of one database session. Resolved once per session and passed to every builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
  #[strum(to_string = "mysql", serialize = "mariadb")]
  MySql,
  #[strum(to_string = "postgres", serialize = "postgresql")]
  Postgres,
}

impl Dialect {
  /// Infer the dialect from a connection URL such as `postgres://...` or `mysql://...`.
  pub fn from_url(url: &str) -> Option<Self> {
    let scheme = url.split_once("://")?.0;
    scheme.parse().ok()
  }

  pub fn quote_identifier(self, name: &str) -> String {
    match self {
      Self::MySql => format!("`{}`", name.replace('`', "``")),
      Self::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
    }
  }

  /// Placeholder for the 1-based parameter `index`. MySQL placeholders are positional and ignore it.
  pub fn placeholder(self, index: usize) -> String {
    match self {
      Self::MySql => "?".to_string(),
      Self::Postgres => format!("${index}"),
    }
  }

  pub fn quote_string_literal(self, value: &str) -> String {
    match self {
      Self::MySql => format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''")),
      Self::Postgres => format!("'{}'", value.replace('\'', "''")),
    }
  }

  /// Whether `value` may be emitted unquoted as a column default.
  pub fn is_safe_default_literal(self, value: &str) -> bool {
    let value = value.trim();
    if NUMERIC_LITERAL.is_match(value) || COMMON_KEYWORD.is_match(value) {
      return true;
    }
    match self {
      Self::MySql => MYSQL_LITERAL.is_match(value),
      Self::Postgres => POSTGRES_LITERAL.is_match(value),
    }
  }

  /// `UPDATE ... LIMIT 1` / `DELETE ... LIMIT 1` are MySQL only.
  pub fn supports_update_limit(self) -> bool {
    matches!(self, Self::MySql)
  }

  pub fn begin_statement(self) -> &'static str {
    match self {
      Self::MySql => "START TRANSACTION",
      Self::Postgres => "BEGIN",
    }
  }

  pub fn default_schema(self) -> Option<&'static str> {
    match self {
      Self::MySql => None,
      Self::Postgres => Some("public"),
    }
  }

  /// `schema.table` when a schema is given, otherwise just the quoted table.
  pub fn qualified_name(self, table: &str, schema: Option<&str>) -> String {
    match schema.filter(|s| !s.is_empty()) {
      Some(schema) => format!("{}.{}", self.quote_identifier(schema), self.quote_identifier(table)),
      None => self.quote_identifier(table),
    }
  }
}

/// Metadata such as charsets and collations is interpolated unquoted, so it has to look like a bare word.
pub fn is_safe_identifier(value: &str) -> bool {
  SAFE_IDENTIFIER.is_match(value)
}
