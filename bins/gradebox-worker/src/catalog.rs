/// Test Catalog - the fixed MiniGit test bank
///
/// Tests are JavaScript fragments executed inside an immediately-invoked
/// function, in the same context as the candidate's source and the
/// assertion helpers. Each tier carries a fixed points budget; tiers 1-2 are
/// visible to the candidate, tiers 3-5 are reported only as counts.

use gradebox_common::error::CatalogError;
use gradebox_common::types::Tier;
use std::collections::{BTreeMap, HashSet};

/// Budgets used by the standard catalog. Must sum to 100.
pub const STANDARD_TIER_BUDGETS: [(u8, u32); 5] = [(1, 25), (2, 25), (3, 20), (4, 20), (5, 10)];

const TOTAL_POINTS: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub id: u32,
    pub name: String,
    pub tier: Tier,
    pub body: String,
}

impl TestCase {
    pub fn new(id: u32, name: impl Into<String>, tier: Tier, body: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tier,
            body: body.into(),
        }
    }

    pub fn visible(&self) -> bool {
        self.tier.is_visible()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub tier: Tier,
    pub points_budget: u32,
}

#[derive(Debug, Clone)]
pub struct TestCatalog {
    tests: Vec<TestCase>,
    budgets: BTreeMap<Tier, u32>,
}

impl TestCatalog {
    /// Build a catalog. Tests are ordered by tier, then by declaration order.
    pub fn new(mut tests: Vec<TestCase>, policies: &[TierPolicy]) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for test in &tests {
            if !seen.insert(test.id) {
                return Err(CatalogError::DuplicateTestId(test.id));
            }
        }

        let mut budgets = BTreeMap::new();
        for policy in policies {
            if budgets.insert(policy.tier, policy.points_budget).is_some() {
                return Err(CatalogError::DuplicateTierPolicy(policy.tier.get()));
            }
        }
        for tier in Tier::ALL {
            if !budgets.contains_key(&tier) {
                return Err(CatalogError::MissingTierPolicy(tier.get()));
            }
        }
        let sum: u32 = budgets.values().sum();
        if sum != TOTAL_POINTS {
            return Err(CatalogError::BudgetMismatch(sum));
        }

        // Stable: keeps declaration order inside a tier
        tests.sort_by_key(|test| test.tier);

        Ok(Self { tests, budgets })
    }

    /// The MiniGit test bank.
    pub fn standard() -> Self {
        Self::new(standard_tests(), &standard_policies())
            .expect("standard catalog is internally consistent")
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestCase> {
        self.tests.iter()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn tests_for_tier(&self, tier: Tier) -> impl Iterator<Item = &TestCase> {
        self.tests.iter().filter(move |test| test.tier == tier)
    }

    /// Number of tests in a tier, never less than 1 so it can be divided by.
    pub fn total_for_tier(&self, tier: Tier) -> usize {
        self.tests_for_tier(tier).count().max(1)
    }

    pub fn budget(&self, tier: Tier) -> u32 {
        self.budgets.get(&tier).copied().unwrap_or(0)
    }

    pub fn policies(&self) -> Vec<TierPolicy> {
        self.budgets
            .iter()
            .map(|(tier, points_budget)| TierPolicy {
                tier: *tier,
                points_budget: *points_budget,
            })
            .collect()
    }
}

pub fn standard_policies() -> Vec<TierPolicy> {
    STANDARD_TIER_BUDGETS
        .iter()
        .filter_map(|(tier, points_budget)| {
            Tier::new(*tier).map(|tier| TierPolicy {
                tier,
                points_budget: *points_budget,
            })
        })
        .collect()
}

fn standard_tests() -> Vec<TestCase> {
    let bank: [(u8, &str, &str); 28] = [
        // Tier 1: init, add, commit, log
        (
            1,
            "init() creates a repository",
            r#"
            const git = new MiniGit();
            git.init();
            assertEqual(typeof git, "object");
            "#,
        ),
        (
            1,
            "add() stages a file",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file1.txt", "hello world");
            "#,
        ),
        (
            1,
            "commit() creates a commit and returns hash",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file1.txt", "hello world");
            const hash = git.commit("initial commit");
            assert(typeof hash === "string" && hash.length > 0, "commit should return a non-empty string hash");
            "#,
        ),
        (
            1,
            "log() returns empty array when no commits",
            r#"
            const git = new MiniGit();
            git.init();
            const logs = git.log();
            assert(Array.isArray(logs), "log() should return an array");
            assertEqual(logs.length, 0);
            "#,
        ),
        (
            1,
            "log() returns commits in reverse chronological order",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file1.txt", "v1");
            git.commit("first");
            git.add("file1.txt", "v2");
            git.commit("second");
            const logs = git.log();
            assertEqual(logs.length, 2);
            assertEqual(logs[0].message, "second");
            assertEqual(logs[1].message, "first");
            "#,
        ),
        (
            1,
            "log() entries have hash and message fields",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file1.txt", "content");
            git.commit("test message");
            const logs = git.log();
            assert(logs[0].hash !== undefined, "log entry should have hash");
            assert(logs[0].message !== undefined, "log entry should have message");
            assertEqual(logs[0].message, "test message");
            "#,
        ),
        (
            1,
            "commit() with multiple files",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("a.txt", "aaa");
            git.add("b.txt", "bbb");
            const hash = git.commit("two files");
            assert(typeof hash === "string" && hash.length > 0, "commit should return hash");
            const logs = git.log();
            assertEqual(logs.length, 1);
            "#,
        ),
        // Tier 2: branch, checkout, isolation
        (
            2,
            "branch() creates a new branch",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "content");
            git.commit("initial");
            git.branch("feature");
            "#,
        ),
        (
            2,
            "checkout() switches to an existing branch",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "content");
            git.commit("initial");
            git.branch("feature");
            git.checkout("feature");
            "#,
        ),
        (
            2,
            "branches are isolated - commits on one branch don't appear on another",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "v1");
            git.commit("initial");
            git.branch("feature");
            git.checkout("feature");
            git.add("file.txt", "v2");
            git.commit("feature commit");
            git.checkout("main");
            const mainLog = git.log();
            assertEqual(mainLog.length, 1);
            assertEqual(mainLog[0].message, "initial");
            git.checkout("feature");
            const featureLog = git.log();
            assertEqual(featureLog.length, 2);
            "#,
        ),
        (
            2,
            "checkout() throws on non-existent branch",
            r#"
            const git = new MiniGit();
            git.init();
            let threw = false;
            try {
              git.checkout("nonexistent");
            } catch (e) {
              threw = true;
            }
            assert(threw, "checkout should throw for non-existent branch");
            "#,
        ),
        (
            2,
            "branch() creates branch at current HEAD",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("a.txt", "a");
            git.commit("first");
            git.add("b.txt", "b");
            git.commit("second");
            git.branch("from-second");
            git.checkout("from-second");
            const logs = git.log();
            assertEqual(logs.length, 2);
            assertEqual(logs[0].message, "second");
            "#,
        ),
        (
            2,
            "checkout() back and forth preserves state",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "original");
            git.commit("initial");
            git.branch("feature");
            git.checkout("feature");
            git.add("new.txt", "new content");
            git.commit("add new file");
            git.checkout("main");
            git.checkout("feature");
            const logs = git.log();
            assertEqual(logs.length, 2);
            assertEqual(logs[0].message, "add new file");
            "#,
        ),
        // Tier 3: status, diff
        (
            3,
            "status() shows staged files",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "content");
            const st = git.status();
            assert(st.staged && st.staged.length > 0, "status should show staged files");
            assert(st.staged.includes("file.txt"), "staged should include file.txt");
            "#,
        ),
        (
            3,
            "status() shows no staged files after commit",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "content");
            git.commit("first");
            const st = git.status();
            assertEqual(st.staged.length, 0);
            "#,
        ),
        (
            3,
            "status() shows modified files",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "v1");
            git.commit("first");
            git.add("file.txt", "v2");
            const st = git.status();
            assert(st.staged.includes("file.txt"), "modified file should appear in staged");
            "#,
        ),
        (
            3,
            "diff() shows added files",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "hello");
            const d = git.diff();
            assert(Array.isArray(d), "diff should return an array");
            assert(d.length > 0, "diff should show changes for added file");
            const entry = d.find(e => e.file === "file.txt");
            assert(entry !== undefined, "diff should contain entry for file.txt");
            assertEqual(entry.status, "added");
            "#,
        ),
        (
            3,
            "diff() shows modified files",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "v1");
            git.commit("first");
            git.add("file.txt", "v2");
            const d = git.diff();
            const entry = d.find(e => e.file === "file.txt");
            assert(entry !== undefined, "diff should contain entry for file.txt");
            assertEqual(entry.status, "modified");
            assertEqual(entry.oldContent, "v1");
            assertEqual(entry.newContent, "v2");
            "#,
        ),
        (
            3,
            "diff() returns empty array when no changes",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "content");
            git.commit("first");
            const d = git.diff();
            assertEqual(d.length, 0);
            "#,
        ),
        // Tier 4: merge
        (
            4,
            "merge() fast-forward merge",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "v1");
            git.commit("initial");
            git.branch("feature");
            git.checkout("feature");
            git.add("file.txt", "v2");
            git.commit("feature update");
            git.checkout("main");
            const result = git.merge("feature");
            assert(!result.conflicts || result.conflicts.length === 0, "fast-forward merge should have no conflicts");
            const logs = git.log();
            assertEqual(logs[0].message, "feature update");
            "#,
        ),
        (
            4,
            "merge() three-way merge creates merge commit",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "base");
            git.commit("initial");
            git.branch("feature");
            git.checkout("feature");
            git.add("feature.txt", "feature content");
            git.commit("add feature file");
            git.checkout("main");
            git.add("main.txt", "main content");
            git.commit("add main file");
            const result = git.merge("feature");
            assert(!result.conflicts || result.conflicts.length === 0, "non-conflicting merge should have no conflicts");
            const logs = git.log();
            assert(logs.length >= 4, "should have merge commit plus all prior commits");
            "#,
        ),
        (
            4,
            "merge() detects conflicts",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "base");
            git.commit("initial");
            git.branch("feature");
            git.checkout("feature");
            git.add("file.txt", "feature version");
            git.commit("feature change");
            git.checkout("main");
            git.add("file.txt", "main version");
            git.commit("main change");
            const result = git.merge("feature");
            assert(result.conflicts && result.conflicts.length > 0, "should detect conflict");
            assert(result.conflicts.includes("file.txt"), "conflict should be on file.txt");
            "#,
        ),
        (
            4,
            "merge() non-conflicting changes to different files",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("shared.txt", "base");
            git.commit("initial");
            git.branch("feature");
            git.checkout("feature");
            git.add("only-feature.txt", "feature stuff");
            git.commit("feature file");
            git.checkout("main");
            git.add("only-main.txt", "main stuff");
            git.commit("main file");
            const result = git.merge("feature");
            assert(!result.conflicts || result.conflicts.length === 0, "different files should not conflict");
            "#,
        ),
        // Tier 5: edge cases
        (
            5,
            "commit() throws when nothing staged",
            r#"
            const git = new MiniGit();
            git.init();
            let threw = false;
            try {
              git.commit("empty");
            } catch (e) {
              threw = true;
            }
            assert(threw, "commit with nothing staged should throw");
            "#,
        ),
        (
            5,
            "branch() throws for duplicate branch name",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("f.txt", "c");
            git.commit("init");
            git.branch("feature");
            let threw = false;
            try {
              git.branch("feature");
            } catch (e) {
              threw = true;
            }
            assert(threw, "creating duplicate branch should throw");
            "#,
        ),
        (
            5,
            "log() on new branch with no extra commits shows parent commits",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("f.txt", "c");
            git.commit("first");
            git.branch("feature");
            git.checkout("feature");
            const logs = git.log();
            assertEqual(logs.length, 1);
            assertEqual(logs[0].message, "first");
            "#,
        ),
        (
            5,
            "complex operations maintain consistency",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("a.txt", "a1");
            git.add("b.txt", "b1");
            git.commit("c1");
            git.branch("dev");
            git.checkout("dev");
            git.add("a.txt", "a2");
            git.commit("c2");
            git.branch("hotfix");
            git.checkout("hotfix");
            git.add("c.txt", "c1");
            git.commit("c3");
            git.checkout("dev");
            const devLogs = git.log();
            assertEqual(devLogs.length, 2);
            git.checkout("hotfix");
            const hotfixLogs = git.log();
            assertEqual(hotfixLogs.length, 3);
            git.checkout("main");
            const mainLogs = git.log();
            assertEqual(mainLogs.length, 1);
            "#,
        ),
        (
            5,
            "add() overwrites previously staged content",
            r#"
            const git = new MiniGit();
            git.init();
            git.add("file.txt", "first");
            git.add("file.txt", "second");
            git.commit("overwrite test");
            const logs = git.log();
            assertEqual(logs.length, 1);
            "#,
        ),
    ];

    bank.iter()
        .enumerate()
        .filter_map(|(idx, (tier, name, body))| {
            Tier::new(*tier).map(|tier| TestCase::new((idx + 1) as u32, *name, tier, *body))
        })
        .collect()
}
