use crate::test_utils::Recorded;

pub trait StatementAssertions {
    fn assert_issued(&self, sql: &str);
    fn assert_none_contains(&self, needle: &str);
    fn count_containing(&self, needle: &str) -> usize;
}

impl StatementAssertions for Vec<Recorded> {
    fn assert_issued(&self, sql: &str) {
        assert!(
            self.iter().any(|r| r.sql == sql),
            "Expected '{}' to be issued, got:\n{}",
            sql,
            self.iter().map(|r| r.sql.as_str()).collect::<Vec<_>>().join("\n")
        );
    }

    fn assert_none_contains(&self, needle: &str) {
        let offending: Vec<&str> = self.iter().map(|r| r.sql.as_str()).filter(|s| s.contains(needle)).collect();
        assert!(offending.is_empty(), "Expected no statement containing '{}', got: {:?}", needle, offending);
    }

    fn count_containing(&self, needle: &str) -> usize {
        self.iter().filter(|r| r.sql.contains(needle)).count()
    }
}
