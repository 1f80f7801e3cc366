//! Integration tests for action chains against the in-memory backend.

use formsync_engine::{
    ActionOptions, ChainError, ChainOutcome, ChainState, Download, EngineConfig, TargetState,
};
use formsync_protocol::{Message, Value, ViewDescriptor};
use formsync_testkit::prelude::*;
use serde_json::json;
use std::time::Duration;

fn harness() -> FormHarness {
    init_tracing();
    FormHarness::new("Order")
}

// Chain parsing and reserved steps

#[tokio::test]
async fn misplaced_sync_rejects_before_any_call() {
    let form = harness();
    form.open(json!({"name": "a"}));

    let err = form
        .executor
        .on_click("apply", "foo,sync,bar", None)
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Syntax { .. }));
    assert!(form.backend.calls().is_empty());
    assert_eq!(form.ui.errors().len(), 1);
    assert_eq!(
        form.executor.state(),
        ChainState::Settled(ChainOutcome::Rejected)
    );
}

#[tokio::test]
async fn sync_flushes_edits_before_actions() {
    let form = harness();
    form.open(json!({"qty": 1}));
    form.respond("foo", vec![]);
    form.respond("bar", vec![]);
    form.host.edit("qty", json!(5));

    form.executor
        .on_change("qty", "sync,foo,bar")
        .await
        .unwrap();

    assert_eq!(form.backend.action_names(), vec!["foo", "bar"]);
    let context = &form.backend.contexts("foo")[0];
    assert_eq!(context["qty"], json!(5));
    assert_eq!(context["_source"], json!("qty"));
    assert_eq!(context["_model"], json!("Order"));
    assert!(form.executor.record().is_dirty());
    assert_eq!(
        form.executor.state(),
        ChainState::Settled(ChainOutcome::Resolved)
    );
}

#[tokio::test]
async fn new_step_installs_defaults() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.respond("prepare", vec![]);
    form.host.set_defaults(map(json!({"status": "draft"})));

    form.executor.on_new("prepare,new").await.unwrap();

    let record = form.executor.record();
    assert_eq!(record.id(), None);
    assert_eq!(record.get("status"), Some(&json!("draft")));
    assert_eq!(form.host.last_shown(), Some(record));
}

#[tokio::test]
async fn close_step_closes_view() {
    let form = harness();
    form.respond("finish", vec![]);
    form.executor.on_click("done", "finish,close", None).await.unwrap();
    assert!(form.ui.saw(&UiEvent::CloseView));
}

#[tokio::test]
async fn declined_prompt_runs_nothing() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.respond("archive", vec![]);
    form.ui.answer(false);

    let err = form
        .executor
        .on_click("archive", "archive", Some("Archive this order?"))
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Declined));
    assert!(form.backend.calls().is_empty());
    assert!(form.ui.errors().is_empty());
    assert_eq!(
        form.executor.state(),
        ChainState::Settled(ChainOutcome::Rejected)
    );
}

// Save pipeline

#[tokio::test]
async fn clean_record_save_short_circuits() {
    let form = harness();
    form.open(json!({"name": "a"}));

    form.executor.save().await.unwrap();

    assert_eq!(form.backend.post_count("save"), 0);
    assert!(form.backend.calls().is_empty());
}

#[tokio::test]
async fn values_then_save_round_trip() {
    let form = harness();
    let opened = form.open(json!({"name": "draft"}));
    let id = opened.id().unwrap();
    form.respond("rename", vec![json!({"values": {"name": "final"}})]);

    form.executor
        .on_change("name", "rename,save")
        .await
        .unwrap();

    let stored = form.backend.get("Order", id).unwrap();
    assert_eq!(stored["name"], json!("final"));
    assert_eq!(stored["version"], json!(1));

    let record = form.executor.record();
    assert_eq!(record.get("name"), Some(&json!("final")));
    assert_eq!(record.version(), Some(1));
    assert!(!record.is_dirty());
    assert_eq!(form.executor.form().snapshot(), &record);
    assert_eq!(form.host.last_shown(), Some(record));
}

#[tokio::test]
async fn new_record_with_content_is_saved() {
    let form = harness();
    form.host.set_defaults(map(json!({"name": "fresh"})));
    form.respond("noop", vec![]);
    form.executor.on_new("noop,new").await.unwrap();

    form.executor.save().await.unwrap();

    assert_eq!(form.backend.len("Order"), 1);
    let record = form.executor.record();
    assert!(record.id().is_some_and(|id| id > 0));
    assert_eq!(record.version(), Some(0));
}

#[tokio::test]
async fn stale_save_requires_reload() {
    let form = harness();
    let opened = form.open(json!({"name": "a"}));
    let id = opened.id().unwrap();
    form.backend.touch("Order", id, map(json!({"name": "b"})));
    form.respond("rename", vec![json!({"values": {"name": "c"}})]);

    let err = form
        .executor
        .handle("rename,save", ActionOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(form.ui.errors().len(), 1);

    let err = form.executor.save().await.unwrap_err();
    assert!(matches!(err, ChainError::ConflictPending));

    form.executor.reload().await.unwrap();
    let record = form.executor.record();
    assert_eq!(record.get("name"), Some(&json!("b")));
    assert_eq!(record.version(), Some(1));
    assert_eq!(form.host.refresh_count(), 1);
    form.executor.save().await.unwrap();
}

#[tokio::test]
async fn before_save_veto_rejects_with_message() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.respond("rename", vec![json!({"values": {"name": "b"}})]);
    form.host.veto("Order is locked");

    let err = form
        .executor
        .on_click("save", "rename,save", None)
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Vetoed { .. }));
    assert_eq!(form.ui.errors()[0].message, "Order is locked");
    assert_eq!(form.backend.post_count("save"), 0);
}

#[tokio::test]
async fn invalid_fields_block_the_save() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.respond("clear", vec![json!({"values": {"name": null}})]);
    form.host.fail_field("name", "Required");

    let err = form
        .executor
        .on_click("save", "clear,save", None)
        .await
        .unwrap_err();

    match err {
        ChainError::Validation { fields } => assert_eq!(fields, vec!["name"]),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(
        form.ui.invalid_fields(),
        vec![("name".to_string(), "Required".to_string())]
    );
    assert_eq!(
        form.ui.errors()[0].message,
        EngineConfig::default().validation_notice
    );
    assert_eq!(form.backend.post_count("save"), 0);

    form.host.clear_failures();
    form.ui.clear();
    form.executor.save().await.unwrap();
    assert!(form.ui.events().is_empty());
    assert_eq!(form.backend.post_count("save"), 1);
    assert_eq!(form.host.shown().len(), 3);
}

#[tokio::test]
async fn validate_step_does_not_write() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.respond("rename", vec![json!({"values": {"name": "b"}})]);

    form.executor
        .on_click("check", "rename,validate", None)
        .await
        .unwrap();

    assert_eq!(form.backend.post_count("save"), 0);
    assert!(form.executor.record().is_dirty());
}

#[tokio::test]
async fn save_directive_commits_grid_edits() {
    let form = harness();
    let opened = form.open(json!({"qty": 1}));
    form.respond("commit", vec![json!({"save": true})]);
    form.host.grid_edit("qty", json!(3));

    form.executor.on_click("commit", "commit", None).await.unwrap();

    let stored = form.backend.get("Order", opened.id().unwrap()).unwrap();
    assert_eq!(stored["qty"], json!(3));
    assert_eq!(stored["version"], json!(1));
}

// Directive precedence

#[tokio::test]
async fn field_errors_stop_value_merge() {
    let form = harness();
    form.open(json!({"qty": 9}));
    form.respond(
        "check-qty",
        vec![json!({"errors": {"qty": "Too many"}, "values": {"qty": 0}})],
    );

    let err = form
        .executor
        .on_change("qty", "check-qty")
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Validation { .. }));
    assert_eq!(form.executor.record().get("qty"), Some(&json!(9)));
    assert_eq!(
        form.ui.invalid_fields(),
        vec![("qty".to_string(), "Too many".to_string())]
    );
}

#[tokio::test]
async fn field_errors_stop_values_of_later_sets() {
    let form = harness();
    form.open(json!({"qty": 9}));
    form.respond(
        "check-qty",
        vec![
            json!({"errors": {"qty": "Too many"}}),
            json!({"values": {"qty": 0}}),
        ],
    );

    let err = form
        .executor
        .on_change("qty", "check-qty")
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Validation { .. }));
    assert_eq!(form.executor.record().get("qty"), Some(&json!(9)));
    assert!(!form.executor.record().is_dirty());
}

#[tokio::test]
async fn blank_field_errors_clear_markers_and_continue() {
    let form = harness();
    form.open(json!({"qty": 9}));
    form.respond(
        "check-qty",
        vec![json!({"errors": {"qty": ""}, "values": {"qty": 2}})],
    );

    form.executor.on_change("qty", "check-qty").await.unwrap();

    assert_eq!(form.executor.record().get("qty"), Some(&json!(2)));
    assert_eq!(
        form.ui.invalid_fields(),
        vec![("qty".to_string(), String::new())]
    );
}

#[tokio::test]
async fn info_pending_runs_before_remaining_steps() {
    let form = harness();
    form.respond(
        "a",
        vec![json!({"info": {"message": "Done"}, "pending": "b"})],
    );
    form.respond("b", vec![]);
    form.respond("c", vec![]);

    form.executor
        .handle("a,c", ActionOptions::new())
        .await
        .unwrap();

    assert_eq!(form.backend.action_names(), vec!["a", "b", "c"]);
    assert!(form.ui.saw(&UiEvent::Info(Message::new("Done"))));
}

#[tokio::test]
async fn refresh_app_halts_the_chain() {
    let form = harness();
    form.respond(
        "upgrade",
        vec![json!({"signal": "refresh-app", "info": {"message": "Updated"}})],
    );
    form.respond("after", vec![]);

    form.executor
        .handle("upgrade,after", ActionOptions::new())
        .await
        .unwrap();

    assert_eq!(form.backend.action_names(), vec!["upgrade"]);
    assert!(form.ui.saw(&UiEvent::ReloadApp));
    assert!(form.ui.saw(&UiEvent::Info(Message::new("Updated"))));
}

#[tokio::test]
async fn refresh_app_in_follow_up_halts_outer_chain() {
    let form = harness();
    form.respond(
        "a",
        vec![json!({"info": {"message": "Upgrading"}, "pending": "b"})],
    );
    form.respond("b", vec![json!({"signal": "refresh-app"})]);
    form.respond("c", vec![]);

    form.executor
        .handle("a,c", ActionOptions::new())
        .await
        .unwrap();

    assert_eq!(form.backend.action_names(), vec!["a", "b"]);
    assert!(form.ui.saw(&UiEvent::ReloadApp));
}

#[tokio::test]
async fn error_directive_runs_action_then_rejects() {
    let form = harness();
    form.respond(
        "post",
        vec![json!({"error": {"message": "Boom", "action": "cleanup"}})],
    );
    form.respond("cleanup", vec![]);
    form.respond("after", vec![]);

    let err = form
        .executor
        .handle("post,after", ActionOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Rejected { ref message } if message == "Boom"));
    assert_eq!(form.backend.action_names(), vec!["post", "cleanup"]);
    let errors = form.ui.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].title.as_deref(), Some("Error"));
}

#[tokio::test]
async fn accepted_alert_runs_pending() {
    let form = harness();
    form.respond(
        "warn",
        vec![json!({"alert": {"message": "Continue?"}, "pending": "go"})],
    );
    form.respond("go", vec![]);

    form.executor
        .handle("warn", ActionOptions::new())
        .await
        .unwrap();

    assert_eq!(form.backend.action_names(), vec!["warn", "go"]);
    assert!(form.ui.saw(&UiEvent::Confirm(
        Message::new("Continue?").with_title("Warning")
    )));
}

#[tokio::test]
async fn declined_alert_runs_fallback_and_rejects() {
    let form = harness();
    form.respond(
        "warn",
        vec![json!({"alert": {"message": "Sure?", "action": "fallback"}, "pending": "go"})],
    );
    form.respond("fallback", vec![]);
    form.respond("go", vec![]);
    form.ui.answer(false);

    let err = form
        .executor
        .handle("warn", ActionOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Rejected { .. }));
    assert_eq!(form.backend.action_names(), vec!["warn", "fallback"]);
}

#[tokio::test]
async fn notify_shows_every_toast() {
    let form = harness();
    form.respond(
        "tell",
        vec![json!({"notify": [{"message": "one"}, {"message": "two"}]})],
    );

    form.executor
        .handle("tell", ActionOptions::new())
        .await
        .unwrap();

    assert!(form.ui.saw(&UiEvent::Notify(Message::new("one"))));
    assert!(form.ui.saw(&UiEvent::Notify(Message::new("two"))));
}

#[tokio::test]
async fn export_and_tab_refresh() {
    let form = harness();
    form.respond(
        "export",
        vec![json!({"exportFile": "orders.csv", "signal": "refresh-tab"})],
    );

    form.executor
        .handle("export", ActionOptions::new())
        .await
        .unwrap();

    assert_eq!(form.ui.downloads(), vec![Download::export("orders.csv")]);
    assert_eq!(form.ui.events().last(), Some(&UiEvent::RefreshTab));
    assert!(form.host.signals().is_empty());
}

#[tokio::test]
async fn generic_signal_reaches_host() {
    let form = harness();
    form.respond(
        "notify-lines",
        vec![json!({"signal": "refresh-lines", "signal-data": {"line": 3}})],
    );

    form.executor
        .handle("notify-lines", ActionOptions::new())
        .await
        .unwrap();

    assert_eq!(
        form.host.signals(),
        vec![("refresh-lines".to_string(), Some(json!({"line": 3})))]
    );
}

// Attributes

#[tokio::test]
async fn attrs_apply_queue_or_drop_by_target() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.host.set_target(
        "qty",
        TargetState::Unloaded {
            view: "lines".into(),
        },
    );
    form.host.set_target("ghost", TargetState::Unknown);
    form.respond(
        "lock",
        vec![json!({"attrs": {
            "name": {"readonly": true},
            "qty": {"hidden": true},
            "ghost": {"hidden": true},
        }})],
    );

    form.executor.on_load("lock").await.unwrap();

    assert_eq!(
        form.host.applied(),
        vec![("name".to_string(), map(json!({"readonly": true})))]
    );
    let state = form.executor.form();
    assert_eq!(state.attrs("name"), Some(&map(json!({"readonly": true}))));
    assert_eq!(state.queued_len("lines"), 1);

    form.executor.nested_view_loaded("lines");
    assert_eq!(
        form.host.applied().last(),
        Some(&("qty".to_string(), map(json!({"hidden": true}))))
    );
    assert_eq!(form.executor.form().queued_len("lines"), 0);
}

#[tokio::test]
async fn value_attrs_edit_the_record() {
    let form = harness();
    form.open(json!({"name": "a", "lines": [{"id": 1, "version": 0, "qty": 1}]}));
    form.respond(
        "set-name",
        vec![json!({"attrs": {"name": {"value": "b"}}})],
    );
    form.respond(
        "add-line",
        vec![json!({"attrs": {"lines": {"value:add": [{"qty": 2}]}}})],
    );
    form.respond(
        "drop-first",
        vec![json!({"attrs": {"lines": {"value:del": [{"id": 1}]}}})],
    );

    form.executor.on_load("set-name").await.unwrap();
    assert_eq!(form.executor.record().get("name"), Some(&json!("b")));

    form.executor.on_load("add-line").await.unwrap();
    let record = form.executor.record();
    let lines = record.get("lines").and_then(Value::as_array).unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines[1]["id"].as_i64().unwrap() < 0);
    assert!(record.is_dirty());

    form.executor.on_load("drop-first").await.unwrap();
    let record = form.executor.record();
    let lines = record.get("lines").and_then(Value::as_array).unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["qty"], json!(2));
}

// Reports and views

#[tokio::test]
async fn attached_report_offers_download() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.respond(
        "print",
        vec![json!({"report": true, "attached": {"id": 9, "fileName": "invoice.pdf"}})],
    );

    form.executor.on_click("print", "print", None).await.unwrap();

    assert_eq!(
        form.ui.downloads(),
        vec![Download::attachment(9, "invoice.pdf")]
    );
    let record = form.executor.record();
    assert_eq!(record.get("$attachments"), Some(&json!(1)));
    assert!(!record.is_dirty());
}

#[tokio::test]
async fn report_link_opens_view_or_downloads_on_mobile() {
    let form = harness();
    let report = json!({
        "report": true,
        "reportLink": "abc",
        "reportFile": "Invoice",
        "reportFormat": "pdf",
    });
    form.respond("print", vec![report]);

    form.executor.on_click("print", "print", None).await.unwrap();
    assert!(form.ui.saw(&UiEvent::OpenView(ViewDescriptor::html(
        "Invoice",
        "ws/files/report?link=abc&name=Invoice"
    ))));

    form.host.set_mobile(true);
    form.executor.on_click("print", "print", None).await.unwrap();
    assert_eq!(
        form.ui.downloads(),
        vec![Download::report("abc", Some("Invoice"))]
    );
}

#[tokio::test]
async fn view_directives_open_download_and_close() {
    let form = harness();
    form.respond(
        "open",
        vec![json!({
            "view": {"title": "Orders", "model": "Order", "viewType": "grid"},
            "canClose": true,
        })],
    );
    form.respond(
        "fetch-file",
        vec![json!({"view": {
            "viewType": "html",
            "resource": "ws/files/x.csv",
            "params": {"download": true, "fileName": "x.csv"},
        }})],
    );

    form.executor
        .handle("open", ActionOptions::new())
        .await
        .unwrap();
    let opened = form
        .ui
        .events()
        .into_iter()
        .find_map(|event| match event {
            UiEvent::OpenView(view) => Some(view),
            _ => None,
        })
        .unwrap();
    assert_eq!(opened.title.as_deref(), Some("Orders"));
    assert!(form.ui.saw(&UiEvent::CloseView));

    form.executor
        .handle("fetch-file", ActionOptions::new())
        .await
        .unwrap();
    assert_eq!(
        form.ui.downloads(),
        vec![Download {
            url: "ws/files/x.csv".into(),
            file_name: Some("x.csv".into()),
        }]
    );
}

#[tokio::test]
async fn reload_directive_refreshes_then_opens_view() {
    let form = harness();
    let opened = form.open(json!({"name": "a"}));
    form.backend
        .touch("Order", opened.id().unwrap(), map(json!({"name": "server"})));
    form.respond(
        "refresh",
        vec![json!({"reload": true, "view": {"title": "Log"}})],
    );

    form.executor
        .handle("refresh", ActionOptions::new())
        .await
        .unwrap();

    assert_eq!(
        form.executor.record().get("name"),
        Some(&json!("server"))
    );
    assert_eq!(form.host.refresh_count(), 1);
    assert!(matches!(
        form.ui.events().last(),
        Some(UiEvent::OpenView(view)) if view.title.as_deref() == Some("Log")
    ));
}

// Concurrency

#[tokio::test]
async fn waiting_chain_sees_earlier_results() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.backend.delay_action("slow", Duration::from_millis(50));
    form.respond("slow", vec![json!({"values": {"stage": "slow"}})]);
    form.backend.on_action("fast", |context| {
        let seen = context.get("stage").cloned().unwrap_or(Value::Null);
        Ok(vec![json!({"values": {"seen": seen}})])
    });

    let (first, second) = tokio::join!(
        form.executor.handle("slow", ActionOptions::new()),
        form.executor
            .handle("fast", ActionOptions::new().with_wait_for_pending(true)),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(form.executor.record().get("seen"), Some(&json!("slow")));
    assert_eq!(form.backend.contexts("fast")[0]["stage"], json!("slow"));
    assert_eq!(form.executor.tracker().in_flight(), 0);
}

#[tokio::test]
async fn chains_interleave_without_waiting() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.backend.delay_action("slow", Duration::from_millis(50));
    form.respond("slow", vec![json!({"values": {"stage": "slow"}})]);
    form.backend.on_action("fast", |context| {
        let seen = context.get("stage").cloned().unwrap_or(Value::Null);
        Ok(vec![json!({"values": {"seen": seen}})])
    });

    let (first, second) = tokio::join!(
        form.executor.handle("slow", ActionOptions::new()),
        form.executor.handle("fast", ActionOptions::new()),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(form.executor.record().get("stage"), Some(&json!("slow")));
    assert_eq!(form.backend.action_names(), vec!["slow", "fast"]);
    assert!(form.backend.contexts("fast")[0].get("stage").is_none());
}

#[tokio::test]
async fn state_stays_chained_while_any_chain_runs() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.backend.delay_action("slow", Duration::from_millis(50));
    form.respond("slow", vec![]);
    form.respond("fast", vec![]);

    let (first, during) = tokio::join!(
        form.executor.handle("slow", ActionOptions::new()),
        async {
            form.executor
                .handle("fast", ActionOptions::new())
                .await
                .unwrap();
            form.executor.state()
        },
    );
    first.unwrap();

    assert_eq!(during, ChainState::Chained);
    assert_eq!(
        form.executor.state(),
        ChainState::Settled(ChainOutcome::Resolved)
    );
}

#[tokio::test]
async fn cancel_stops_at_next_step() {
    let form = harness();
    form.open(json!({"name": "a"}));
    form.backend.delay_action("slow", Duration::from_millis(50));
    form.respond("slow", vec![json!({"values": {"stage": "slow"}})]);
    form.respond("after", vec![]);

    let (result, ()) = tokio::join!(
        form.executor.handle("slow,after", ActionOptions::new()),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            form.executor.cancel();
        },
    );

    assert!(matches!(result, Err(ChainError::Cancelled)));
    assert_eq!(form.backend.action_names(), vec!["slow"]);
    assert_eq!(form.executor.record().get("stage"), None);
}
