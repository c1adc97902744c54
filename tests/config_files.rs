use std::io::Write;

use agentflow::tools::standard_toolkit;
use agentflow::{ErrorKind, FlowConfig, ReasoningMode, SessionContext, SessionSnapshot, StubModel};
use tempfile::NamedTempFile;

const PARTY: &str = r#"
[model]
provider = "huggingface"

[tools]
search_max_results = 3

[[agent]]
name = "alfred"
description = "Butler of Wayne Manor"
system_prompt = "You are Alfred. Plan the party."
tools = ["suggest_menu", "superhero_party_theme"]
mode = "react_loop"
max_steps = 5
can_handoff_to = ["caterer"]

[[agent]]
name = "caterer"
description = "Knows the caterers of Gotham"
tools = ["catering_service"]
"#;

#[tokio::test]
async fn configured_party_workflow_runs() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{PARTY}").unwrap();
    let cfg = FlowConfig::from_file(file.path()).unwrap();
    assert_eq!(cfg.tools.search_max_results, 3);
    assert_eq!(cfg.agents[0].mode, ReasoningMode::ReactLoop);

    let model = StubModel::new(vec![
        "Thought: A formal party needs a formal menu.\nAction: suggest_menu\nAction Input: {\"occasion\": \"formal\"}".into(),
        "Thought: I can answer without using any more tools.\nAnswer: A 3-course dinner with wine and dessert.".into(),
    ]);
    let workflow = cfg
        .build_workflow(standard_toolkit(&cfg.tools).unwrap(), model)
        .unwrap();
    assert_eq!(workflow.root(), "alfred");

    let output = workflow
        .run_stateless("Prepare a formal menu for the party.")
        .await
        .unwrap();
    assert_eq!(output.answer, "A 3-course dinner with wine and dessert.");
    assert_eq!(output.tool_calls, 1);
}

#[test]
fn unknown_tool_in_config_is_rejected() {
    let raw = PARTY.replace("\"catering_service\"", "\"teleporter\"");
    let cfg = FlowConfig::from_toml(&raw).unwrap();
    let err = cfg
        .build_workflow(
            standard_toolkit(&cfg.tools).unwrap(),
            StubModel::new(vec![]),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn restored_session_continues_the_conversation() {
    let cfg = FlowConfig::from_toml(PARTY).unwrap();
    let model = StubModel::new(vec![
        "Answer: Noted, the theme is villain masquerade.".into(),
        "Answer: You chose the villain masquerade.".into(),
    ]);
    let workflow = cfg
        .build_workflow(standard_toolkit(&cfg.tools).unwrap(), model.clone())
        .unwrap();

    let ctx = SessionContext::with_id("wayne-manor");
    ctx.set_variable("guests", serde_json::json!(120));
    workflow
        .run(&ctx, "The theme is villain masquerade.")
        .await
        .unwrap();

    let saved = serde_json::to_string(&ctx.snapshot()).unwrap();
    let snapshot: SessionSnapshot = serde_json::from_str(&saved).unwrap();
    let restored = SessionContext::restore(snapshot);
    assert_eq!(restored.conversation_id(), "wayne-manor");
    assert_eq!(restored.history(), ctx.history());

    workflow
        .run(&restored, "Which theme did I choose?")
        .await
        .unwrap();
    let request = &model.requests()[1];
    assert!(request
        .history
        .iter()
        .any(|turn| turn.content == "The theme is villain masquerade."));
    assert!(request.prompt.contains("\"guests\":120"));
}
