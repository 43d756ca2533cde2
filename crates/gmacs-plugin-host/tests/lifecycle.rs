//! Plugin lifecycle integration tests

mod common;

use common::*;
use gmacs_plugin_host::plugins::{BuildSpec, PluginManifest, PluginState, SpecKind};
use gmacs_plugin_host::{HostError, PluginSource};
use gmacs_plugin_sdk::{HandshakeFailure, KeyBindingSpec};
use gmacs_plugin_word_count::{COUNT_COMMAND, WordCount};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

const FORTY_TWO_WORDS: &str = "It was the best of times, it was the worst of times, \
    it was the age of wisdom, it was the age of foolishness, it was the epoch of belief, \
    it was the epoch of incredulity, it was the season of Light, it was the season of";

#[tokio::test]
async fn test_word_count_round_trip() {
    let h = Harness::new();
    h.add("word-count", WordCount::new).await;
    h.manager.load("word-count").await.unwrap();

    let info = h.manager.info("word-count").await.unwrap();
    assert_eq!(info.state, PluginState::Loaded);
    assert_eq!(info.description.as_deref(), Some("Counts the words in a buffer"));
    assert!(info.load_time.is_some());
    assert!(info.last_error.is_none());

    {
        let registry = h.manager.registry().await;
        assert_eq!(registry.command_owner(COUNT_COMMAND), Some("word-count"));
        let binding = registry.lookup_key("C-c w", None).unwrap();
        assert_eq!(binding.command, COUNT_COMMAND);
    }

    h.editor.add_buffer("tale", FORTY_TWO_WORDS);
    h.manager
        .execute_command(COUNT_COMMAND, Vec::new())
        .await
        .unwrap();
    assert_eq!(h.editor.last_status().as_deref(), Some("Words: 42"));
}

#[tokio::test]
async fn test_user_config_reaches_initialize() {
    let h = Harness::with_config(|config| {
        config
            .plugins
            .entry("word-count".into())
            .or_default()
            .config
            .insert("label".into(), json!("Count"));
    });
    h.add("word-count", WordCount::new).await;
    h.manager.load("word-count").await.unwrap();

    h.editor.add_buffer("short", "three little words");
    h.manager
        .execute_command(COUNT_COMMAND, Vec::new())
        .await
        .unwrap();
    assert_eq!(h.editor.last_status().as_deref(), Some("Count: 3"));
}

#[tokio::test]
async fn test_manifest_defaults_are_overridden_by_settings() {
    let h = Harness::with_config(|config| {
        config
            .plugins
            .entry("word-count".into())
            .or_default()
            .config
            .insert("label".into(), json!("Mine"));
    });
    h.transport.register("word-count", WordCount::new);
    let manifest = PluginManifest::from_json(
        r#"{
            "name": "word-count",
            "version": "0.1.0",
            "binary": "gmacs-plugin-word-count",
            "default_config": { "label": "Theirs" }
        }"#,
    )
    .unwrap();
    h.manager
        .register(
            "word-count",
            h.prebuilt("word-count"),
            Some(manifest),
        )
        .await
        .unwrap();
    h.manager.load("word-count").await.unwrap();

    h.editor.add_buffer("b", "a b");
    h.manager
        .execute_command(COUNT_COMMAND, Vec::new())
        .await
        .unwrap();
    assert_eq!(h.editor.last_status().as_deref(), Some("Mine: 2"));
}

#[tokio::test]
async fn test_conflicting_specs_fail_the_second_plugin() {
    let h = Harness::new();
    h.add("word-count", WordCount::new).await;
    h.add_scripted(
        ScriptSpec::new("copycat")
            .command("copycat-hello", |host, _| async move { host.set_status("hello").await })
            .command(COUNT_COMMAND, |_, _| async { Ok(()) }),
    )
    .await;

    h.manager.load("word-count").await.unwrap();
    let err = h.manager.load("copycat").await.unwrap_err();
    match err {
        HostError::SpecConflict(conflict) => {
            assert_eq!(conflict.kind, SpecKind::Command);
            assert_eq!(conflict.name, COUNT_COMMAND);
            assert_eq!(conflict.owner, "word-count");
        }
        other => panic!("expected a spec conflict, got {other:?}"),
    }

    assert_eq!(h.manager.state("copycat").await, Some(PluginState::Error));
    let registry = h.manager.registry().await;
    assert_eq!(registry.command_owner(COUNT_COMMAND), Some("word-count"));
    // Nothing from the rejected batch leaks in
    assert!(registry.command_owner("copycat-hello").is_none());
}

#[tokio::test]
async fn test_binding_conflict_is_detected() {
    let h = Harness::new();
    h.add("word-count", WordCount::new).await;
    h.add_scripted(
        ScriptSpec::new("keys")
            .command("keys-run", |_, _| async { Ok(()) })
            .binding(KeyBindingSpec::global("C-c w", "keys-run")),
    )
    .await;

    h.manager.load("word-count").await.unwrap();
    let err = h.manager.load("keys").await.unwrap_err();
    assert!(matches!(
        err,
        HostError::SpecConflict(ref c) if c.kind == SpecKind::KeyBinding
    ));
}

#[tokio::test]
async fn test_initialize_timeout_then_reload() {
    let h = Harness::new();
    let spec = ScriptSpec::new("sleepy").command("sleepy-run", |host, _| async move {
        host.set_status("awake").await
    });
    let slow = spec.slow_init.clone();
    slow.store(true, Ordering::SeqCst);
    h.add_scripted(spec).await;

    let err = h.manager.load("sleepy").await.unwrap_err();
    assert!(matches!(err, HostError::CallTimeout { .. }), "{err:?}");

    let info = h.manager.info("sleepy").await.unwrap();
    assert_eq!(info.state, PluginState::Error);
    assert!(info.last_error.unwrap().contains("timed out"));
    assert!(h.manager.registry().await.is_empty());
    assert!(h.editor.messages().iter().any(|m| m.contains("sleepy")));

    // Error is sticky until an explicit reload
    let err = h.manager.load("sleepy").await.unwrap_err();
    assert!(matches!(err, HostError::InvalidState(_)));

    slow.store(false, Ordering::SeqCst);
    h.manager.reload("sleepy").await.unwrap();
    let info = h.manager.info("sleepy").await.unwrap();
    assert_eq!(info.state, PluginState::Loaded);
    assert!(info.last_error.is_none());

    h.manager.execute_command("sleepy-run", Vec::new()).await.unwrap();
    assert_eq!(h.editor.last_status().as_deref(), Some("awake"));
}

#[tokio::test]
async fn test_malformed_handshake() {
    let h = Harness::new();
    h.transport.register_raw("garbled", garbage_hello);
    h.manager
        .register(
            "garbled",
            h.prebuilt("garbled"),
            None,
        )
        .await
        .unwrap();

    let err = h.manager.load("garbled").await.unwrap_err();
    assert!(matches!(err, HostError::Handshake(HandshakeFailure::Malformed(_))));
    assert_eq!(h.manager.state("garbled").await, Some(PluginState::Error));
}

#[tokio::test]
async fn test_plugin_exiting_before_handshake() {
    let h = Harness::new();
    h.transport.register_raw("quitter", exits_immediately);
    h.manager
        .register(
            "quitter",
            h.prebuilt("quitter"),
            None,
        )
        .await
        .unwrap();

    let err = h.manager.load("quitter").await.unwrap_err();
    assert!(matches!(err, HostError::Handshake(HandshakeFailure::ProcessExited)));
}

#[tokio::test]
async fn test_missing_binary_is_a_spawn_error() {
    let h = Harness::new();
    h.manager
        .register(
            "ghost",
            PluginSource::Binary(PathBuf::from("/plugins/ghost")),
            None,
        )
        .await
        .unwrap();

    let err = h.manager.load("ghost").await.unwrap_err();
    assert!(matches!(err, HostError::Spawn(_)));
    assert_eq!(h.manager.state("ghost").await, Some(PluginState::Error));
}

#[tokio::test]
async fn test_unload_removes_specs_and_hooks() {
    let h = Harness::new();
    h.add_scripted(
        ScriptSpec::new("listener")
            .command("listener-run", |_, _| async { Ok(()) })
            .hook("after-save"),
    )
    .await;

    h.manager.load("listener").await.unwrap();
    assert_eq!(h.manager.hook_subscribers("after-save").await, vec!["listener"]);

    h.manager.unload("listener").await.unwrap();
    assert_eq!(h.manager.state("listener").await, Some(PluginState::Unloaded));
    assert!(h.manager.registry().await.is_empty());
    assert!(h.manager.hook_subscribers("after-save").await.is_empty());

    let err = h
        .manager
        .execute_command("listener-run", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::CommandNotFound(_)));

    // A fresh load starts a new connection
    h.manager.load("listener").await.unwrap();
    assert_eq!(h.transport.opened().len(), 2);
}

#[tokio::test]
async fn test_lost_connection_moves_plugin_to_error() {
    let h = Harness::new();
    h.add("word-count", WordCount::new).await;
    h.manager.load("word-count").await.unwrap();

    h.transport.kill("word-count");
    assert!(h.wait_for_state("word-count", PluginState::Error).await);

    let info = h.manager.info("word-count").await.unwrap();
    assert!(info.last_error.unwrap().contains("connection"));
    assert!(h.manager.registry().await.command_owner(COUNT_COMMAND).is_none());

    let err = h
        .manager
        .execute_command(COUNT_COMMAND, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::CommandNotFound(_)));

    h.manager.reload("word-count").await.unwrap();
    assert_eq!(h.manager.state("word-count").await, Some(PluginState::Loaded));
}

#[tokio::test]
async fn test_build_cache_skips_rebuilds() {
    let builder = CountingBuilder::new("3f9a0c2e");
    let h = Harness::with_builder(builder.clone());
    h.transport.register("word-count", WordCount::new);
    let source = PluginSource::Build(BuildSpec::Local {
        path: PathBuf::from("/src/word-count"),
    });
    h.manager
        .register("word-count", source, None)
        .await
        .unwrap();

    h.manager.load("word-count").await.unwrap();
    h.manager.reload("word-count").await.unwrap();
    assert_eq!(builder.builds(), 1);

    let opened = h.transport.opened();
    assert_eq!(opened.len(), 2);
    assert_eq!(opened[0].1, opened[1].1);
    assert!(opened[0].1.starts_with(h.cache_dir.path()));

    let entries = h.manager.loader().cache_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].hash, "3f9a0c2e");

    // A source change means a new hash and a new build
    *builder.hash.lock().unwrap() = "77d1e0b4".into();
    h.manager.reload("word-count").await.unwrap();
    assert_eq!(builder.builds(), 2);
}

fn local_word_count() -> PluginSource {
    PluginSource::Build(BuildSpec::Local {
        path: PathBuf::from("/src/word-count"),
    })
}

#[tokio::test]
async fn test_cached_binary_exiting_early_is_rebuilt() {
    let builder = CountingBuilder::new("5e1f00d");
    let h = Harness::with_builder(builder.clone());
    h.transport.register("word-count", WordCount::new);
    h.manager
        .register("word-count", local_word_count(), None)
        .await
        .unwrap();
    h.manager.load("word-count").await.unwrap();
    h.manager.unload("word-count").await.unwrap();
    assert_eq!(builder.builds(), 1);

    h.transport.exit_on_next_opens("word-count", 1);
    h.manager.load("word-count").await.unwrap();

    assert_eq!(builder.builds(), 2);
    assert_eq!(h.transport.opened().len(), 3);
    assert_eq!(h.manager.state("word-count").await, Some(PluginState::Loaded));
    let entries = h.manager.loader().cache_entries().await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].binary_path.is_file());
}

#[tokio::test]
async fn test_rebuilt_binary_failing_again_is_reported() {
    let builder = CountingBuilder::new("5e1f00d");
    let h = Harness::with_builder(builder.clone());
    h.transport.register("word-count", WordCount::new);
    h.manager
        .register("word-count", local_word_count(), None)
        .await
        .unwrap();
    h.manager.load("word-count").await.unwrap();
    h.manager.unload("word-count").await.unwrap();

    h.transport.exit_on_next_opens("word-count", 2);
    let err = h.manager.load("word-count").await.unwrap_err();

    assert!(matches!(err, HostError::Handshake(HandshakeFailure::ProcessExited)), "{err:?}");
    // One rebuild, no further retries
    assert_eq!(builder.builds(), 2);
    assert_eq!(h.transport.opened().len(), 3);
    let info = h.manager.info("word-count").await.unwrap();
    assert_eq!(info.state, PluginState::Error);
    assert!(info.last_error.is_some());
}

#[tokio::test]
async fn test_build_source_without_builder() {
    let h = Harness::new();
    h.manager
        .register(
            "word-count",
            PluginSource::Build(BuildSpec::Git {
                repository: "https://example.invalid/word-count.git".into(),
                reference: "main".into(),
            }),
            None,
        )
        .await
        .unwrap();

    let err = h.manager.load("word-count").await.unwrap_err();
    assert!(matches!(err, HostError::Build(_)), "{err:?}");
    assert_eq!(h.manager.state("word-count").await, Some(PluginState::Error));
}

#[tokio::test]
async fn test_load_preconditions() {
    let h = Harness::with_config(|config| {
        config.plugins.entry("off".into()).or_default().enabled = false;
    });
    h.add("off", WordCount::new).await;
    let err = h.manager.load("off").await.unwrap_err();
    assert!(matches!(err, HostError::Disabled(_)));
    let off = h.manager.info("off").await.unwrap();
    assert_eq!(off.state, PluginState::Unloaded);
    assert_eq!(off.last_error, Some(err.to_string()));

    let err = h.manager.load("nobody").await.unwrap_err();
    assert!(matches!(err, HostError::NotFound(_)));

    let manifest = PluginManifest::from_json(
        r#"{ "name": "future", "version": "1.0.0", "min_gmacs_version": "9.0.0" }"#,
    )
    .unwrap();
    h.manager
        .register(
            "future",
            h.prebuilt("future"),
            Some(manifest),
        )
        .await
        .unwrap();
    let err = h.manager.load("future").await.unwrap_err();
    assert!(matches!(err, HostError::IncompatibleHost { .. }));
    let future = h.manager.info("future").await.unwrap();
    assert_eq!(future.state, PluginState::Unloaded);
    assert_eq!(future.last_error, Some(err.to_string()));

    let manifest = PluginManifest::from_json(
        r#"{ "name": "needy", "version": "1.0.0", "dependencies": ["future"] }"#,
    )
    .unwrap();
    h.manager
        .register("needy", h.prebuilt("needy"), Some(manifest))
        .await
        .unwrap();
    let err = h.manager.load("needy").await.unwrap_err();
    assert!(matches!(err, HostError::MissingDependency { ref dependency, .. } if dependency == "future"));
    let needy = h.manager.info("needy").await.unwrap();
    assert_eq!(needy.state, PluginState::Unloaded);
    assert!(needy.last_error.unwrap().contains("future"));
}

#[tokio::test]
async fn test_load_twice_is_rejected() {
    let h = Harness::new();
    h.add("word-count", WordCount::new).await;
    h.manager.load("word-count").await.unwrap();
    let err = h.manager.load("word-count").await.unwrap_err();
    assert!(matches!(err, HostError::InvalidState(_)));
}

#[tokio::test]
async fn test_load_all_respects_dependencies() {
    let h = Harness::new();
    for (name, deps) in [("markdown", vec!["text-utils"]), ("text-utils", vec![])] {
        let spec = ScriptSpec::new(name).command(&format!("{name}-run"), |_, _| async { Ok(()) });
        h.transport.register(name, move || spec.build());
        let manifest = PluginManifest::from_json(
            &json!({ "name": name, "version": "1.0.0", "dependencies": deps }).to_string(),
        )
        .unwrap();
        h.manager
            .register(
                name,
                h.prebuilt(name),
                Some(manifest),
            )
            .await
            .unwrap();
    }

    // Loading the dependent first fails
    let err = h.manager.load("markdown").await.unwrap_err();
    assert!(matches!(err, HostError::MissingDependency { .. }));

    let results = h.manager.load_all().await;
    let order: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(order, vec!["text-utils", "markdown"]);
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    h.manager.shutdown().await;
    let states: Vec<PluginState> = h.manager.list().await.into_iter().map(|i| i.state).collect();
    assert_eq!(states, vec![PluginState::Unloaded, PluginState::Unloaded]);
}

#[tokio::test]
async fn test_unregister_requires_unloaded() {
    let h = Harness::new();
    h.add("word-count", WordCount::new).await;
    h.manager.load("word-count").await.unwrap();

    assert!(matches!(
        h.manager.unregister("word-count").await,
        Err(HostError::InvalidState(_))
    ));
    h.manager.unload("word-count").await.unwrap();
    h.manager.unregister("word-count").await.unwrap();
    assert!(h.manager.list().await.is_empty());
}
