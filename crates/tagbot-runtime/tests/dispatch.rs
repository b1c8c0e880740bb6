//! Shout dispatch against closure-backed scripts.

use serde_json::{json, Value as JsonValue};
use std::cell::Cell;
use std::rc::Rc;
use tagbot_event::{ActionKind, ShoutAction};
use tagbot_runtime::config::RuntimeConfig;
use tagbot_runtime::testing::{bot, context, ScriptedSandbox};
use tagbot_runtime::{
    calculate_action_results, calculate_action_results_with, CalculationContext, DispatchError,
};
use tagbot_types::{Bot, BotId, TagValue};

fn returns_own_id() -> ScriptedSandbox {
    ScriptedSandbox::new().with_script("id", |call| Ok(json!(call.this.as_str())))
}

fn with_config(config: RuntimeConfig, bots: Vec<Bot>, sandbox: ScriptedSandbox) -> CalculationContext {
    context(bots, sandbox).with_config(config)
}

#[test]
fn read_your_writes_across_listeners() {
    let sandbox = ScriptedSandbox::new()
        .with_script("write", |call| {
            let this = call.this.clone();
            call.host.set_tag(&this, "count", TagValue::from(5))?;
            Ok(JsonValue::Null)
        })
        .with_script("read", |call| {
            let value = call.host.get_tag(&BotId::new("a"), "#count")?;
            Ok(value.to_json())
        });
    let mut ctx = context(
        vec![
            bot("a", json!({"#go": "write", "count": 1})),
            bot("b", json!({"#go": "read"})),
        ],
        sandbox,
    );

    let results = calculate_action_results(&mut ctx, &ShoutAction::new("go")).unwrap();

    assert_eq!(results.results, vec![json!(5)]);
    assert_eq!(results.events.len(), 1);
    match &results.events[0].kind {
        ActionKind::UpdateBot { bot_id, update } => {
            assert_eq!(bot_id, &BotId::new("a"));
            assert_eq!(update.get("count"), Some(&TagValue::from(5)));
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[test]
fn writes_around_a_nested_shout_stay_in_one_update() {
    let sandbox = ScriptedSandbox::new()
        .with_script("outer", |call| {
            let this = call.this.clone();
            call.host.set_tag(&this, "x", TagValue::from(1))?;
            call.host.shout(ShoutAction::new("ping"))?;
            call.host.set_tag(&this, "y", TagValue::from(2))?;
            Ok(JsonValue::Null)
        })
        .with_script("inner", |call| {
            let this = call.this.clone();
            call.host.set_tag(&this, "seen", TagValue::from(true))?;
            Ok(json!(1))
        });
    let mut ctx = context(
        vec![bot("a", json!({"#go": "outer"})), bot("b", json!({"#ping": "inner"}))],
        sandbox,
    );

    let results = calculate_action_results(&mut ctx, &ShoutAction::new("go")).unwrap();

    let updates: Vec<(String, Vec<String>)> = results
        .events
        .iter()
        .filter_map(|event| match &event.kind {
            ActionKind::UpdateBot { bot_id, update } => {
                Some((bot_id.to_string(), update.keys().cloned().collect()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec![
            ("b".to_string(), vec!["seen".to_string()]),
            ("a".to_string(), vec!["x".to_string(), "y".to_string()]),
        ]
    );
}

#[test]
fn targets_are_sorted_by_default() {
    let bots = vec![bot("a", json!({"#who": "id"})), bot("b", json!({"#who": "id"}))];

    let mut ctx = context(bots.clone(), returns_own_id());
    let sorted = calculate_action_results(&mut ctx, &ShoutAction::new("who").to(["b", "a"])).unwrap();
    assert_eq!(sorted.results, vec![json!("a"), json!("b")]);

    let mut ctx = context(bots, returns_own_id());
    let unsorted = calculate_action_results(
        &mut ctx,
        &ShoutAction::new("who").to(["b", "a"]).unsorted(),
    )
    .unwrap();
    assert_eq!(unsorted.results, vec![json!("b"), json!("a")]);
}

#[test]
fn unknown_targets_are_skipped() {
    let mut ctx = context(vec![bot("a", json!({"#who": "id"}))], returns_own_id());
    let results =
        calculate_action_results(&mut ctx, &ShoutAction::new("who").to(["ghost", "a"])).unwrap();
    assert_eq!(results.results, vec![json!("a")]);
}

#[test]
fn empty_results_are_excluded() {
    let sandbox = ScriptedSandbox::new()
        .with_script("null", |_| Ok(JsonValue::Null))
        .with_script("empty", |_| Ok(json!("")))
        .with_script("zero", |_| Ok(json!(0)))
        .with_script("no", |_| Ok(json!(false)));
    let mut ctx = context(
        vec![
            bot("a", json!({"#go": "null"})),
            bot("b", json!({"#go": "empty"})),
            bot("c", json!({"#go": "zero"})),
            bot("d", json!({"#go": "no"})),
        ],
        sandbox,
    );

    let results = calculate_action_results(&mut ctx, &ShoutAction::new("go")).unwrap();
    assert_eq!(results.results, vec![json!(0), json!(false)]);
    assert_eq!(results.listeners.len(), 4);
}

#[test]
fn non_listening_bots_do_not_run() {
    let mut ctx = context(
        vec![
            bot("a", json!({"#who": "id", "listening": false})),
            bot("b", json!({"#who": "id", "listening": "false"})),
        ],
        returns_own_id(),
    );
    let results = calculate_action_results(&mut ctx, &ShoutAction::new("who")).unwrap();
    assert!(results.results.is_empty());
    assert!(!results.has_listeners());
}

#[test]
fn nobody_listening_is_a_no_op() {
    let mut ctx = context(vec![bot("a", json!({"color": "red"}))], ScriptedSandbox::new());
    let results = calculate_action_results(&mut ctx, &ShoutAction::new("missing")).unwrap();
    assert_eq!(results, Default::default());
}

#[test]
fn argument_is_shared_between_listeners() {
    let sandbox = ScriptedSandbox::new().with_script("bump", |call| {
        let that = call.that_mut().unwrap();
        let n = that["n"].as_i64().unwrap_or(0) + 1;
        that["n"] = json!(n);
        Ok(json!(n))
    });
    let mut ctx = context(
        vec![bot("a", json!({"#bump": "bump"})), bot("b", json!({"#bump": "bump"}))],
        sandbox,
    );

    let shout = ShoutAction::new("bump").with_argument(json!({"n": 0}));
    let results = calculate_action_results(&mut ctx, &shout).unwrap();
    assert_eq!(results.results, vec![json!(1), json!(2)]);
}

#[test]
fn missing_argument_binds_targets() {
    let sandbox = ScriptedSandbox::new().with_script("count", |call| {
        assert!(call.that().is_none());
        Ok(json!(call.targets().len()))
    });
    let mut ctx = context(
        vec![bot("a", json!({"#count": "count"})), bot("b", json!({}))],
        sandbox,
    );
    let results = calculate_action_results(&mut ctx, &ShoutAction::new("count")).unwrap();
    assert_eq!(results.results, vec![json!(2)]);
}

#[test]
fn on_shout_can_rewrite_responses() {
    let sandbox = ScriptedSandbox::new()
        .with_script("one", |_| Ok(json!(1)))
        .with_script("two", |_| Ok(json!(2)))
        .with_script("double", |call| {
            let that = call.that_mut().unwrap();
            assert_eq!(that["name"], json!("ask"));
            if let Some(JsonValue::Array(items)) = that.get_mut("responses") {
                for item in items.iter_mut() {
                    *item = json!(item.as_i64().unwrap_or(0) * 2);
                }
            }
            Ok(json!("ignored"))
        });
    let mut ctx = context(
        vec![
            bot("a", json!({"#ask": "one"})),
            bot("b", json!({"#ask": "two"})),
            bot("m", json!({"#onShout": "double"})),
        ],
        sandbox,
    );

    let results = calculate_action_results(&mut ctx, &ShoutAction::new("ask")).unwrap();
    assert_eq!(results.results, vec![json!(2), json!(4)]);
    assert_eq!(
        results.listeners,
        vec![BotId::new("a"), BotId::new("b")]
    );
}

#[test]
fn on_any_shout_sees_targets_and_listeners() {
    let sandbox = ScriptedSandbox::new()
        .with_script("one", |_| Ok(json!(1)))
        .with_script("clear", |call| {
            let that = call.that_mut().unwrap();
            assert_eq!(that["targets"].as_array().map(Vec::len), Some(2));
            assert_eq!(that["listeners"][0]["id"], json!("a"));
            that["responses"] = json!({});
            Ok(JsonValue::Null)
        });
    let mut ctx = context(
        vec![
            bot("a", json!({"#ask": "one"})),
            bot("z", json!({"#onAnyShout": "clear"})),
        ],
        sandbox,
    );

    let results = calculate_action_results(&mut ctx, &ShoutAction::new("ask")).unwrap();
    assert!(results.results.is_empty());
}

#[test]
fn meta_shouts_can_be_skipped() {
    let ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&ran);
    let sandbox = ScriptedSandbox::new().with_script("meta", move |_| {
        flag.set(true);
        Ok(JsonValue::Null)
    });
    let mut ctx = context(vec![bot("a", json!({"#onShout": "meta"}))], sandbox);

    calculate_action_results_with(&mut ctx, &ShoutAction::new("x"), false).unwrap();
    assert!(!ran.get());

    calculate_action_results(&mut ctx, &ShoutAction::new("x")).unwrap();
    assert!(ran.get());
}

#[test]
fn combine_injects_partner() {
    let sandbox = ScriptedSandbox::new().with_script("open", |call| {
        let that = call.that().unwrap();
        Ok(json!([that["bot"]["id"], that["x"]]))
    });
    let bots = vec![
        bot("door", json!({"#combine(#kind:key)": "open"})),
        bot("key", json!({"kind": "key"})),
        bot("rock", json!({"kind": "rock"})),
    ];

    let mut ctx = context(bots.clone(), sandbox.clone());
    let shout = ShoutAction::new("combine")
        .to(["door", "key"])
        .with_argument(json!({"x": 1}));
    let results = calculate_action_results(&mut ctx, &shout).unwrap();
    assert_eq!(results.results, vec![json!(["key", 1])]);

    let mut ctx = context(bots, sandbox);
    let shout = ShoutAction::new("combine").to(["door", "rock"]);
    let results = calculate_action_results(&mut ctx, &shout).unwrap();
    assert!(results.results.is_empty());
    assert!(!results.has_listeners());
}

#[test]
fn combine_argument_is_per_listener() {
    let sandbox = ScriptedSandbox::new().with_script("grab", |call| {
        let that = call.that_mut().unwrap();
        let partner = that["bot"]["id"].clone();
        that["x"] = json!("changed");
        Ok(partner)
    });
    let mut ctx = context(
        vec![bot("a", json!({"#combine": "grab"})), bot("b", json!({"#combine": "grab"}))],
        sandbox,
    );
    let shout = ShoutAction::new("combine").with_argument(json!({"x": 1}));
    let results = calculate_action_results(&mut ctx, &shout).unwrap();
    assert_eq!(results.results, vec![json!("b"), json!("a")]);
}

#[test]
fn script_error_aborts_the_call() {
    let sandbox = ScriptedSandbox::new()
        .with_script("write", |call| {
            let this = call.this.clone();
            call.host.set_tag(&this, "x", TagValue::from(1))?;
            Ok(JsonValue::Null)
        })
        .with_script("fail", |call| {
            Err(DispatchError::script(call.this, call.tag, "boom"))
        });
    let mut ctx = context(
        vec![bot("a", json!({"#go": "write"})), bot("b", json!({"#go": "fail"}))],
        sandbox,
    );

    let err = calculate_action_results(&mut ctx, &ShoutAction::new("go")).unwrap_err();
    assert_eq!(err, DispatchError::script(&BotId::new("b"), "#go", "boom"));
}

#[test]
fn energy_exhaustion_aborts() {
    let mut config = RuntimeConfig::default();
    config.energy.budget = 2;
    let mut ctx = with_config(
        config,
        vec![
            bot("a", json!({"#go": "id"})),
            bot("b", json!({"#go": "id"})),
            bot("c", json!({"#go": "id"})),
        ],
        returns_own_id(),
    );

    let err = calculate_action_results(&mut ctx, &ShoutAction::new("go")).unwrap_err();
    assert_eq!(err, DispatchError::OutOfEnergy);
    assert!(ctx.energy().is_exhausted());
}

#[test]
fn swallowed_exhaustion_still_aborts() {
    let sandbox = ScriptedSandbox::new().with_script("greedy", |call| {
        // Ignores the error on purpose.
        let _ = call.host.energy().consume(1_000_000);
        Ok(json!("done"))
    });
    let mut ctx = context(vec![bot("a", json!({"#go": "greedy"}))], sandbox);

    let err = calculate_action_results(&mut ctx, &ShoutAction::new("go")).unwrap_err();
    assert_eq!(err, DispatchError::OutOfEnergy);
}

#[test]
fn runaway_recursion_hits_depth_limit() {
    let mut config = RuntimeConfig::default();
    config.dispatch.max_depth = 5;
    let sandbox = ScriptedSandbox::new().with_script("again", |call| {
        let results = call.host.shout(ShoutAction::new("loop"))?;
        Ok(json!(results.len()))
    });
    let mut ctx = with_config(config, vec![bot("a", json!({"#loop": "again"}))], sandbox);

    let err = calculate_action_results(&mut ctx, &ShoutAction::new("loop")).unwrap_err();
    assert!(matches!(err, DispatchError::DepthExceeded { max_depth: 5, .. }));
}

#[test]
fn nested_shout_returns_results_and_keeps_order() {
    let sandbox = ScriptedSandbox::new()
        .with_script("outer", |call| {
            call.host.emit(ActionKind::toast("before"));
            let inner = call.host.shout(ShoutAction::new("inner"))?;
            call.host.emit(ActionKind::toast("after"));
            Ok(json!(inner))
        })
        .with_script("inner", |call| {
            call.host.emit(ActionKind::toast("inner"));
            Ok(json!("pong"))
        });
    let mut ctx = context(
        vec![bot("a", json!({"#outer": "outer"})), bot("b", json!({"#inner": "inner"}))],
        sandbox,
    );

    let results = calculate_action_results(&mut ctx, &ShoutAction::new("outer")).unwrap();
    assert_eq!(results.results, vec![json!(["pong"])]);

    let messages: Vec<&str> = results
        .events
        .iter()
        .filter_map(|event| match &event.kind {
            ActionKind::Toast { message } => Some(message.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(messages, vec!["before", "inner", "after"]);

    let ids: Vec<u64> = results.events.iter().map(|event| event.id.0).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

#[test]
fn formulas_evaluate_and_memoize() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let sandbox = ScriptedSandbox::new()
        .with_script("n * 2", move |call| {
            counter.set(counter.get() + 1);
            let this = call.this.clone();
            let n = call.host.get_tag(&this, "n")?.as_number().unwrap_or(0.0);
            Ok(json!(n * 2.0))
        })
        .with_script("read", |call| {
            let a = BotId::new("a");
            let first = call.host.get_tag(&a, "double")?;
            let second = call.host.get_tag(&a, "double")?;
            assert_eq!(first, second);
            Ok(first.to_json())
        });
    let mut ctx = context(
        vec![
            bot("a", json!({"n": 2, "double": "=n * 2"})),
            bot("b", json!({"#ask": "read"})),
        ],
        sandbox,
    );

    let results = calculate_action_results(&mut ctx, &ShoutAction::new("ask")).unwrap();
    assert_eq!(results.results, vec![json!(4)]);
    assert_eq!(calls.get(), 1);
}

#[test]
fn formula_cycle_is_an_error() {
    let sandbox = ScriptedSandbox::new()
        .with_script("loop", |call| {
            let this = call.this.clone();
            Ok(call.host.get_tag(&this, "x")?.to_json())
        })
        .with_script("read", |call| Ok(call.host.get_tag(&BotId::new("a"), "x")?.to_json()));
    let mut ctx = context(
        vec![bot("a", json!({"x": "=loop"})), bot("b", json!({"#ask": "read"}))],
        sandbox,
    );

    let err = calculate_action_results(&mut ctx, &ShoutAction::new("ask")).unwrap_err();
    assert_eq!(
        err,
        DispatchError::FormulaCycle {
            bot: BotId::new("a"),
            tag: "x".into(),
        }
    );
}

#[test]
fn formula_listening_tag_is_evaluated() {
    let sandbox = returns_own_id().with_script("false", |_| Ok(json!(false)));
    let mut ctx = context(
        vec![bot("a", json!({"#who": "id", "listening": "=false"}))],
        sandbox,
    );
    let results = calculate_action_results(&mut ctx, &ShoutAction::new("who")).unwrap();
    assert!(!results.has_listeners());
}
