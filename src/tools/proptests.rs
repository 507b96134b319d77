//! Property-based tests for registry collision behavior.

use super::test_helpers::StaticTool;
use super::{RegisteredTool, ToolRegistry, ToolSource};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

const NAMES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

fn arb_source() -> impl Strategy<Value = ToolSource> {
    prop_oneof![
        Just(ToolSource::Bundled),
        Just(ToolSource::User),
        Just(ToolSource::Project),
        Just(ToolSource::Mcp("srv".to_string())),
    ]
}

fn arb_registration() -> impl Strategy<Value = (usize, ToolSource)> {
    (0..NAMES.len(), arb_source())
}

fn make_tool(name: &'static str, source: ToolSource) -> RegisteredTool {
    RegisteredTool::builtin(
        Arc::new(StaticTool {
            tool_name: name,
            reply: "ok",
        }),
        source,
    )
}

proptest! {
    /// For every registration sequence the table has no duplicate names,
    /// and each name's winner follows the policy: a registration succeeds
    /// exactly when the slot is empty or currently held by `Bundled`.
    #[test]
    fn registry_uniqueness_and_determinism(
        registrations in prop::collection::vec(arb_registration(), 0..24)
    ) {
        let registry = ToolRegistry::new();
        let mut model: HashMap<&str, ToolSource> = HashMap::new();

        for (name_idx, source) in registrations {
            let name = NAMES[name_idx];
            let expect_ok = match model.get(name) {
                None => true,
                Some(existing) => *existing == ToolSource::Bundled,
            };
            let outcome = registry.register(make_tool(name, source.clone()));
            prop_assert_eq!(outcome.is_ok(), expect_ok);
            if expect_ok {
                model.insert(name, source);
            }
        }

        let listed = registry.list();
        let mut names: Vec<String> = listed.iter().map(|t| t.name.clone()).collect();
        names.sort();
        names.dedup();
        prop_assert_eq!(names.len(), listed.len(), "duplicate names in registry");

        for tool in listed {
            prop_assert_eq!(&tool.source, &model[tool.name.as_str()]);
        }
    }
}
