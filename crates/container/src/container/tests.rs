use std::panic::{self, AssertUnwindSafe};

use serde_json::json;

use super::TaskContainer;
use crate::definition::TaskDefinition;

fn names(defs: &[TaskDefinition]) -> Vec<&str> {
    defs.iter().map(|d| d.name.as_str()).collect()
}

fn sample() -> TaskContainer {
    let container = TaskContainer::new();
    container.batch_add_tasks(vec![
        TaskDefinition::new("expose").with_priority(5),
        TaskDefinition::new("plate_solve").with_priority(3),
        TaskDefinition::new("slew").with_priority(5).with_enabled(false),
        TaskDefinition::new("guide_settle").with_priority(1),
    ]);
    container
}

// ── add / remove / get ──────────────────────────────────────────

#[test]
fn add_and_get() {
    let container = TaskContainer::new();
    container.add_task(TaskDefinition::new("expose").with_priority(2));

    assert_eq!(container.get_task_count(), 1);
    assert_eq!(container.get_task("expose").unwrap().priority, 2);
    assert!(container.get_task("missing").is_none());
}

#[test]
fn duplicate_name_overwrites_without_merge() {
    let container = TaskContainer::new();
    container.add_task(
        TaskDefinition::new("expose")
            .with_priority(2)
            .with_description("first"),
    );
    container.add_task(TaskDefinition::new("expose").with_priority(7));

    let stored = container.get_task("expose").unwrap();
    assert_eq!(container.get_task_count(), 1);
    assert_eq!(stored.priority, 7);
    assert!(stored.description.is_none(), "fields must not be merged");
}

#[test]
fn remove_and_clear() {
    let container = sample();
    container.remove_task("slew");
    container.remove_task("not_there");
    assert_eq!(container.get_task_count(), 3);
    assert!(container.get_task("slew").is_none());

    container.clear_tasks();
    assert_eq!(container.get_task_count(), 0);
}

// ── find / sort ─────────────────────────────────────────────────

#[test]
fn find_tasks_ands_filters() {
    let container = sample();

    let p5 = container.find_tasks(Some(5), None);
    assert_eq!(names(&p5), vec!["expose", "slew"]);

    let p5_enabled = container.find_tasks(Some(5), Some(true));
    assert_eq!(names(&p5_enabled), vec!["expose"]);

    let disabled = container.find_tasks(None, Some(false));
    assert_eq!(names(&disabled), vec!["slew"]);

    assert!(container.find_tasks(Some(42), Some(true)).is_empty());
    assert_eq!(container.find_tasks(None, None).len(), 4);
}

#[test]
fn sort_by_priority_ascending_is_stable() {
    let container = sample();
    container.sort_tasks(|a, b| a.priority.cmp(&b.priority));

    let all = container.get_all_tasks();
    // expose and slew share priority 5 and keep their relative order.
    assert_eq!(names(&all), vec!["guide_settle", "plate_solve", "expose", "slew"]);
}

// ── batch ───────────────────────────────────────────────────────

#[test]
fn batch_remove_ignores_unknown_names() {
    let container = sample();
    container.batch_remove_tasks(["expose", "nope", "slew"]);
    assert_eq!(
        names(&container.get_all_tasks()),
        vec!["plate_solve", "guide_settle"]
    );
}

#[test]
fn batch_modify_applies_to_every_task() {
    let container = sample();
    container.batch_modify_tasks(|t| {
        t.enabled = true;
        t.priority += 10;
    });

    let all = container.get_all_tasks();
    assert!(all.iter().all(|t| t.enabled));
    assert_eq!(container.get_task("guide_settle").unwrap().priority, 11);
    assert_eq!(container.get_task("expose").unwrap().priority, 15);
}

#[test]
fn batch_modify_rekeys_renamed_tasks() {
    let container = sample();
    container.batch_modify_tasks(|t| {
        if t.name == "slew" {
            t.name = "slew_to_target".to_string();
        }
    });

    assert!(container.get_task("slew").is_none());
    assert_eq!(container.get_task("slew_to_target").unwrap().priority, 5);
    assert_eq!(container.get_task_count(), 4);
}

#[test]
fn batch_modify_panic_keeps_every_task() {
    let container = sample();
    let before = names(&container.get_all_tasks())
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();

    let mut seen = 0;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        container.batch_modify_tasks(|t| {
            seen += 1;
            if seen == 2 {
                panic!("bad definition {}", t.name);
            }
            t.priority += 100;
        })
    }));
    assert!(outcome.is_err());

    let all = container.get_all_tasks();
    assert_eq!(container.get_task_count(), 4);
    assert_eq!(names(&all), before);
    // Only the definition visited before the panic was changed
    assert_eq!(all[0].priority, 105);
    assert_eq!(container.get_task("plate_solve").unwrap().priority, 3);
}

// ── params ──────────────────────────────────────────────────────

#[test]
fn params_last_write_wins_and_keeps_position() {
    let container = TaskContainer::new();
    container.add_or_update_task_params("expose", json!({"exposure_s": 30}));
    container.add_or_update_task_params("slew", json!({"ra": 10.5}));
    container.add_or_update_task_params("expose", json!({"exposure_s": 60}));

    assert_eq!(
        container.get_task_params("expose").unwrap(),
        json!({"exposure_s": 60})
    );
    let listed = container.list_task_params();
    assert_eq!(listed[0].0, "expose");
    assert_eq!(listed[1].0, "slew");
}

#[test]
fn insert_params_at_index() {
    let container = TaskContainer::new();
    container.add_or_update_task_params("a", json!(1));
    container.add_or_update_task_params("b", json!(2));
    container.insert_task_params("c", json!(3), 1);
    container.insert_task_params("d", json!(4), 99);

    let keys: Vec<String> = container.list_task_params().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["a", "c", "b", "d"]);
}

#[test]
fn insert_params_moves_existing_key() {
    let container = TaskContainer::new();
    container.add_or_update_task_params("a", json!(1));
    container.add_or_update_task_params("b", json!(2));
    container.add_or_update_task_params("c", json!(3));
    container.insert_task_params("c", json!(30), 0);

    let listed = container.list_task_params();
    assert_eq!(listed[0], ("c".to_string(), json!(30)));
    assert_eq!(listed.len(), 3);
}

#[test]
fn missing_params_are_absent() {
    let container = TaskContainer::new();
    assert!(container.get_task_params("nothing").is_none());
    container.remove_task_params("nothing");
    assert!(container.list_task_params().is_empty());
}
