//! Outline to-do library: a tree of dated tasks with date ordering, structural edits,
//! import validation, and whole-blob persistence.
//! The core stays pure. Storage and presentation sit behind small seams so a view layer
//! (the bundled CLI, or anything else) only hands over resolved intents.

pub mod core {
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};
    use std::{collections::HashSet, fmt};
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    /// Opaque task identifier. Minted ids are UUID v4 strings; imported ids may be any
    /// non-empty string that is unique within the outline.
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TaskId(pub String);

    impl TaskId {
        pub fn new() -> Self {
            Self(Uuid::new_v4().to_string())
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl fmt::Display for TaskId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl From<&str> for TaskId {
        fn from(s: &str) -> Self {
            Self(s.to_string())
        }
    }

    impl From<String> for TaskId {
        fn from(s: String) -> Self {
            Self(s)
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// A task node. Each task owns its subtasks outright; there is no back-reference to
    /// the parent, so every traversal carries its path from the root.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Task {
        pub id: TaskId,

        /// Due date; `None` sorts after every real date.
        pub date: Option<NaiveDate>,

        #[serde(default)]
        pub text: String,

        /// Child tasks. Order inside a date group is the user's manual order.
        #[serde(default)]
        pub subtasks: Vec<Task>,

        /// View hint, meaningful only when `subtasks` is non-empty.
        #[serde(default)]
        pub collapsed: bool,
    }

    impl Task {
        pub fn new(date: Option<NaiveDate>, text: impl Into<String>) -> Self {
            Self {
                id: TaskId::new(),
                date,
                text: text.into(),
                subtasks: vec![],
                collapsed: false,
            }
        }

        pub fn has_children(&self) -> bool {
            !self.subtasks.is_empty()
        }

        /// Deep copy of the subtree with a freshly minted id on every node.
        pub fn clone_with_fresh_ids(&self) -> Self {
            Self {
                id: TaskId::new(),
                date: self.date,
                text: self.text.clone(),
                subtasks: self
                    .subtasks
                    .iter()
                    .map(Task::clone_with_fresh_ids)
                    .collect(),
                collapsed: self.collapsed,
            }
        }

        /// Depth-first walk over this task and all descendants (including self).
        pub fn walk<'a>(&'a self, out: &mut Vec<&'a Task>) {
            out.push(self);
            for t in &self.subtasks {
                t.walk(out);
            }
        }
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// Aggregate root: the top-level sibling group. Its serialized form
    /// (`{"tasks": [...]}`) is both the store blob and the export file.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Outline {
        #[serde(default)]
        pub tasks: Vec<Task>,
    }

    impl Outline {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn from_tasks(tasks: Vec<Task>) -> Self {
            Self { tasks }
        }

        pub fn is_empty(&self) -> bool {
            self.tasks.is_empty()
        }

        /// Snapshot all tasks in depth-first order.
        pub fn all_tasks(&self) -> Vec<&Task> {
            let mut v = Vec::new();
            for t in &self.tasks {
                t.walk(&mut v);
            }
            v
        }

        pub fn task_count(&self) -> usize {
            self.all_tasks().len()
        }

        pub fn ids(&self) -> HashSet<TaskId> {
            self.all_tasks().into_iter().map(|t| t.id.clone()).collect()
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    /// Why an imported or stored document was rejected.
    #[derive(Debug, thiserror::Error)]
    pub enum ValidationError {
        #[error("invalid JSON: {0}")]
        Json(#[from] serde_json::Error),
        #[error("Bad import")]
        NotAnObject,
        #[error("Bad task object")]
        BadTask,
        #[error("Invalid date in task: {0}")]
        InvalidDate(String),
    }

    /// Errors surfaced by outline operations. `Display` is the short status message a
    /// view shows to the user.
    #[derive(Debug, thiserror::Error)]
    pub enum OutlineError {
        #[error("Task not found.")]
        NotFound(TaskId),
        #[error("Invalid date.")]
        InvalidDate(#[from] crate::dates::InvalidDate),
        #[error("Drop not allowed (different date group or different parent).")]
        MoveNotAllowed { id: TaskId, target: TaskId },
        #[error("Import failed: {0}")]
        Validation(#[from] ValidationError),
        #[error("Another operation is still in progress.")]
        Busy,
        #[error("storage error: {0}")]
        Storage(#[from] anyhow::Error),
    }
}

pub mod dates {
    //! Calendar-date helpers: strict ISO parsing, sort and group keys, display text.

    use chrono::{Datelike, NaiveDate};
    use nom::{
        IResult,
        bytes::complete::take_while_m_n,
        character::complete::char,
        combinator::{all_consuming, map_res},
        error::VerboseError,
        sequence::tuple,
    };

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("invalid date {0:?}; expected YYYY-MM-DD")]
    pub struct InvalidDate(pub String);

    /// Grouping key. Derived ordering puts every dated group first, ascending, then
    /// the undated group.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum DateGroup {
        Dated(NaiveDate),
        Undated,
    }

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// Validate optional user or file input. `None` and `""` mean "no date"; anything
    /// else must be an exact `YYYY-MM-DD` naming a real calendar day.
    pub fn parse_date(input: Option<&str>) -> Result<Option<NaiveDate>, InvalidDate> {
        match input {
            None | Some("") => Ok(None),
            Some(s) => parse_iso_date(s)
                .map(Some)
                .ok_or_else(|| InvalidDate(s.to_string())),
        }
    }

    /// Strict `YYYY-MM-DD`; rejects short fields, trailing text and impossible days.
    pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
        all_consuming(iso_date)(s).ok().map(|(_, d)| d)
    }

    fn iso_date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((
                map_res(take_while_m_n(4, 4, char_is_digit), |s: &str| {
                    s.parse::<i32>()
                }),
                char('-'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
                    s.parse::<u32>()
                }),
                char('-'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
                    s.parse::<u32>()
                }),
            )),
            |(y, _, m, _, d)| NaiveDate::from_ymd_opt(y, m, d).ok_or("invalid calendar date"),
        )(i)
    }

    fn char_is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    /// Sort key where "no date" lands strictly after any parseable date. Sibling
    /// ordering sorts on this; `group_key` only decides which tasks share a group.
    pub fn sort_key(date: Option<NaiveDate>) -> NaiveDate {
        date.unwrap_or(NaiveDate::MAX)
    }

    pub fn group_key(date: Option<NaiveDate>) -> DateGroup {
        match date {
            Some(d) => DateGroup::Dated(d),
            None => DateGroup::Undated,
        }
    }

    /// `M/D` within the current year, `M/D/YYYY` otherwise.
    pub fn format_for_display(date: NaiveDate, today: NaiveDate) -> String {
        if date.year() == today.year() {
            format!("{}/{}", date.month(), date.day())
        } else {
            format!("{}/{}/{}", date.month(), date.day(), date.year())
        }
    }

}

pub mod tree {
    //! Path-based lookup over the outline. A node is addressed by the sibling indices
    //! leading from the root sequence to its parent, plus its own index.

    use crate::core::{Outline, Task, TaskId};

    /// Where a task lives: `parent_path` resolves to its sibling sequence.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TaskLocation {
        pub parent_path: Vec<usize>,
        pub index: usize,
    }

    impl TaskLocation {
        /// Full index path from the root sequence down to the task itself.
        pub fn path_from_root(&self) -> Vec<usize> {
            let mut p = self.parent_path.clone();
            p.push(self.index);
            p
        }

        pub fn depth(&self) -> usize {
            self.parent_path.len()
        }

        pub fn is_root_level(&self) -> bool {
            self.parent_path.is_empty()
        }
    }

    /// Result of a successful lookup.
    #[derive(Debug)]
    pub struct Found<'a> {
        pub task: &'a Task,
        pub siblings: &'a [Task],
        pub location: TaskLocation,
    }

    impl Outline {
        /// Depth-first search. `collapsed` flags are ignored.
        pub fn locate(&self, id: &TaskId) -> Option<TaskLocation> {
            fn rec(tasks: &[Task], id: &TaskId, path: &mut Vec<usize>) -> Option<TaskLocation> {
                for (i, t) in tasks.iter().enumerate() {
                    if &t.id == id {
                        return Some(TaskLocation {
                            parent_path: path.clone(),
                            index: i,
                        });
                    }
                    path.push(i);
                    if let Some(hit) = rec(&t.subtasks, id, path) {
                        return Some(hit);
                    }
                    path.pop();
                }
                None
            }
            rec(&self.tasks, id, &mut Vec::new())
        }

        pub fn find(&self, id: &TaskId) -> Option<Found<'_>> {
            let location = self.locate(id)?;
            let siblings = self.sequence(&location.parent_path)?;
            let task = siblings.get(location.index)?;
            Some(Found {
                task,
                siblings,
                location,
            })
        }

        pub fn get(&self, id: &TaskId) -> Option<&Task> {
            self.find(id).map(|f| f.task)
        }

        pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
            let location = self.locate(id)?;
            self.sequence_mut(&location.parent_path)?
                .get_mut(location.index)
        }

        /// Resolve a parent path to the sibling sequence it names. The empty path is
        /// the root sequence.
        pub fn sequence(&self, path: &[usize]) -> Option<&[Task]> {
            let mut seq: &[Task] = &self.tasks;
            for &i in path {
                seq = &seq.get(i)?.subtasks;
            }
            Some(seq)
        }

        pub fn sequence_mut(&mut self, path: &[usize]) -> Option<&mut Vec<Task>> {
            let mut seq = &mut self.tasks;
            for &i in path {
                seq = &mut seq.get_mut(i)?.subtasks;
            }
            Some(seq)
        }

        pub fn set_collapsed_recursive(&mut self, collapsed: bool) {
            set_collapsed_recursive(&mut self.tasks, collapsed);
        }
    }

    /// Applies to every task with children; leaves are left alone.
    pub fn set_collapsed_recursive(tasks: &mut [Task], collapsed: bool) {
        for t in tasks {
            if t.has_children() {
                t.collapsed = collapsed;
            }
            set_collapsed_recursive(&mut t.subtasks, collapsed);
        }
    }

}

pub mod ordering {
    //! Date ordering of sibling sequences.
    //!
    //! Every sequence is partitioned into date groups: one group per calendar date in
    //! ascending order, then the undated group. The reorder is a stable sort, so manual
    //! order inside a group survives and reordering an ordered sequence is a no-op.

    use crate::core::Task;
    use crate::dates::sort_key;

    /// Reorder one sibling sequence.
    pub fn order_siblings(tasks: &mut [Task]) {
        tasks.sort_by_key(|t| sort_key(t.date));
    }

    /// Reorder a sequence and every sequence below it.
    pub fn order_recursive(tasks: &mut [Task]) {
        order_siblings(tasks);
        for t in tasks.iter_mut() {
            order_recursive(&mut t.subtasks);
        }
    }

    pub fn is_ordered(tasks: &[Task]) -> bool {
        tasks
            .windows(2)
            .all(|w| sort_key(w[0].date) <= sort_key(w[1].date))
    }

}

pub mod markers {
    //! Ordinal labels for rendering. The style cycles with depth: `1.`, `A.`, `i.`,
    //! `a.`, then back to numerals.

    /// Label for the zero-based `index` among siblings at `depth`.
    pub fn marker_for(depth: usize, index: usize) -> String {
        let n = index + 1;
        match depth % 4 {
            0 => format!("{n}."),
            1 => format!("{}.", to_alpha(n, true)),
            2 => format!("{}.", to_roman(n).to_lowercase()),
            _ => format!("{}.", to_alpha(n, false)),
        }
    }

    /// Bijective base-26: 1 -> A, 26 -> Z, 27 -> AA.
    pub fn to_alpha(mut n: usize, upper: bool) -> String {
        let base = if upper { b'A' } else { b'a' };
        let mut out = Vec::new();
        while n > 0 {
            n -= 1;
            out.push((base + (n % 26) as u8) as char);
            n /= 26;
        }
        out.iter().rev().collect()
    }

    const ROMAN: [(usize, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];

    /// Subtractive Roman numerals. Values past 3999 keep stacking `M`.
    pub fn to_roman(mut n: usize) -> String {
        let mut out = String::new();
        for (value, sym) in ROMAN {
            while n >= value {
                out.push_str(sym);
                n -= value;
            }
        }
        out
    }

}

pub mod mutation {
    //! Structural edits. Each command locates its task by id, applies the change,
    //! then reorders every sibling sequence whose membership changed.

    use crate::core::{Outline, OutlineError, Task, TaskId};
    use crate::dates::{group_key, parse_date};
    use crate::ordering::{order_recursive, order_siblings};
    use crate::tree::TaskLocation;
    use tracing::{debug, warn};

    /// Drop position relative to the target task, decided by the view layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Placement {
        Above,
        Below,
    }

    /// The write surface of the outline.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Command {
        AddRoot { date: Option<String>, text: String },
        AddSubtask { parent: TaskId },
        InsertSibling { after: TaskId },
        Delete { id: TaskId },
        Copy { id: TaskId },
        Indent { id: TaskId },
        Outdent { id: TaskId },
        Move { id: TaskId, target: TaskId, placement: Placement },
        SetDate { id: TaskId, date: Option<String> },
        SetText { id: TaskId, text: String },
        ToggleCollapsed { id: TaskId },
        SetCollapsed { id: TaskId, collapsed: bool },
        SetAllCollapsed { collapsed: bool },
    }

    impl Command {
        pub fn name(&self) -> &'static str {
            match self {
                Command::AddRoot { .. } => "add-root",
                Command::AddSubtask { .. } => "add-subtask",
                Command::InsertSibling { .. } => "insert-sibling",
                Command::Delete { .. } => "delete",
                Command::Copy { .. } => "copy",
                Command::Indent { .. } => "indent",
                Command::Outdent { .. } => "outdent",
                Command::Move { .. } => "move",
                Command::SetDate { .. } => "set-date",
                Command::SetText { .. } => "set-text",
                Command::ToggleCollapsed { .. } => "toggle-collapsed",
                Command::SetCollapsed { .. } => "set-collapsed",
                Command::SetAllCollapsed { .. } => "set-all-collapsed",
            }
        }
    }

    /// What a command did. `focus` names the task a view should re-focus: the
    /// created, copied or moved task.
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct Outcome {
        pub changed: bool,
        pub focus: Option<TaskId>,
    }

    impl Outcome {
        pub fn unchanged() -> Self {
            Self::default()
        }

        fn changed(focus: Option<TaskId>) -> Self {
            Self {
                changed: true,
                focus,
            }
        }
    }

    impl Outline {
        pub fn apply(&mut self, command: Command) -> Result<Outcome, OutlineError> {
            let name = command.name();
            let outcome = match command {
                Command::AddRoot { date, text } => self.insert_root_task(date.as_deref(), &text),
                Command::AddSubtask { parent } => self.add_subtask(&parent),
                Command::InsertSibling { after } => self.insert_sibling_after(&after),
                Command::Delete { id } => self.delete_task(&id),
                Command::Copy { id } => self.copy_subtree(&id),
                Command::Indent { id } => self.indent(&id),
                Command::Outdent { id } => self.outdent(&id),
                Command::Move {
                    id,
                    target,
                    placement,
                } => self.move_task(&id, &target, placement),
                Command::SetDate { id, date } => self.set_date(&id, date.as_deref()),
                Command::SetText { id, text } => self.set_text(&id, text),
                Command::ToggleCollapsed { id } => self.toggle_collapsed(&id),
                Command::SetCollapsed { id, collapsed } => self.set_collapsed(&id, collapsed),
                Command::SetAllCollapsed { collapsed } => {
                    self.set_collapsed_recursive(collapsed);
                    Ok(Outcome::changed(None))
                }
            }?;
            debug!(command = name, changed = outcome.changed, "applied command");
            Ok(outcome)
        }

        /// Append a new root task. Blank text is the caller's to reject.
        pub fn insert_root_task(
            &mut self,
            date: Option<&str>,
            text: &str,
        ) -> Result<Outcome, OutlineError> {
            let date = parse_date(date)?;
            let task = Task::new(date, text);
            let id = task.id.clone();
            self.tasks.push(task);
            order_siblings(&mut self.tasks);
            Ok(Outcome::changed(Some(id)))
        }

        pub fn add_subtask(&mut self, parent: &TaskId) -> Result<Outcome, OutlineError> {
            let parent_task = self
                .get_mut(parent)
                .ok_or_else(|| OutlineError::NotFound(parent.clone()))?;
            let child = Task::new(None, "");
            let id = child.id.clone();
            parent_task.subtasks.push(child);
            parent_task.collapsed = false;
            order_siblings(&mut parent_task.subtasks);
            Ok(Outcome::changed(Some(id)))
        }

        /// New empty task right after `reference`, sharing its date so it stays in
        /// the same group.
        pub fn insert_sibling_after(&mut self, reference: &TaskId) -> Result<Outcome, OutlineError> {
            let (loc, seq) = self.siblings_of(reference)?;
            let task = Task::new(seq[loc.index].date, "");
            let id = task.id.clone();
            seq.insert(loc.index + 1, task);
            order_siblings(seq);
            Ok(Outcome::changed(Some(id)))
        }

        /// Removes the task together with its whole subtree.
        pub fn delete_task(&mut self, id: &TaskId) -> Result<Outcome, OutlineError> {
            let (loc, seq) = self.siblings_of(id)?;
            let removed = seq.remove(loc.index);
            order_siblings(seq);
            debug!(task = %id, children = removed.subtasks.len(), "deleted subtree");
            Ok(Outcome::changed(None))
        }

        pub fn copy_subtree(&mut self, id: &TaskId) -> Result<Outcome, OutlineError> {
            let (loc, seq) = self.siblings_of(id)?;
            let copy = seq[loc.index].clone_with_fresh_ids();
            let copy_id = copy.id.clone();
            seq.insert(loc.index + 1, copy);
            order_siblings(seq);
            Ok(Outcome::changed(Some(copy_id)))
        }

        /// Make the task the last child of its previous sibling. No-op for a first child.
        pub fn indent(&mut self, id: &TaskId) -> Result<Outcome, OutlineError> {
            let (loc, seq) = self.siblings_of(id)?;
            if loc.index == 0 {
                return Ok(Outcome::unchanged());
            }
            let task = seq.remove(loc.index);
            let prev = &mut seq[loc.index - 1];
            prev.subtasks.push(task);
            prev.collapsed = false;
            order_siblings(&mut prev.subtasks);
            order_siblings(seq);
            Ok(Outcome::changed(Some(id.clone())))
        }

        /// Move the task up one level, right after its former parent. No-op at root level.
        pub fn outdent(&mut self, id: &TaskId) -> Result<Outcome, OutlineError> {
            let loc = self.require(id)?;
            let Some((&parent_index, grand_path)) = loc.parent_path.split_last() else {
                return Ok(Outcome::unchanged());
            };
            let grand = self
                .sequence_mut(grand_path)
                .ok_or_else(|| OutlineError::NotFound(id.clone()))?;
            let parent = grand
                .get_mut(parent_index)
                .ok_or_else(|| OutlineError::NotFound(id.clone()))?;
            let task = parent.subtasks.remove(loc.index);
            order_siblings(&mut parent.subtasks);
            grand.insert(parent_index + 1, task);
            order_siblings(grand);
            Ok(Outcome::changed(Some(id.clone())))
        }

        /// Drag-and-drop reorder. Only legal inside one sibling sequence and one date
        /// group; the dragged task lands directly above or below `target`.
        pub fn move_task(
            &mut self,
            id: &TaskId,
            target: &TaskId,
            placement: Placement,
        ) -> Result<Outcome, OutlineError> {
            let from = self.require(id)?;
            let to = self.require(target)?;
            if id == target {
                return Ok(Outcome::unchanged());
            }
            let not_allowed = || OutlineError::MoveNotAllowed {
                id: id.clone(),
                target: target.clone(),
            };
            if from.parent_path != to.parent_path {
                warn!(task = %id, target = %target, "rejected move across parents");
                return Err(not_allowed());
            }
            let seq = self
                .sequence_mut(&from.parent_path)
                .ok_or_else(|| OutlineError::NotFound(id.clone()))?;
            if group_key(seq[from.index].date) != group_key(seq[to.index].date) {
                warn!(task = %id, target = %target, "rejected move across date groups");
                return Err(not_allowed());
            }

            let moved = seq.remove(from.index);
            // Removing the dragged task first shifts everything after it down by one.
            let insert_at = match placement {
                Placement::Above if from.index < to.index => to.index - 1,
                Placement::Above => to.index,
                Placement::Below if from.index < to.index => to.index,
                Placement::Below => to.index + 1,
            };
            seq.insert(insert_at, moved);
            order_siblings(seq);
            Ok(Outcome::changed(Some(id.clone())))
        }

        /// Validate and set (or clear) a date, then reorder the whole outline.
        pub fn set_date(&mut self, id: &TaskId, date: Option<&str>) -> Result<Outcome, OutlineError> {
            let date = parse_date(date)?;
            let task = self
                .get_mut(id)
                .ok_or_else(|| OutlineError::NotFound(id.clone()))?;
            task.date = date;
            order_recursive(&mut self.tasks);
            Ok(Outcome::changed(None))
        }

        pub fn set_text(&mut self, id: &TaskId, text: String) -> Result<Outcome, OutlineError> {
            let task = self
                .get_mut(id)
                .ok_or_else(|| OutlineError::NotFound(id.clone()))?;
            task.text = text;
            Ok(Outcome::changed(None))
        }

        pub fn toggle_collapsed(&mut self, id: &TaskId) -> Result<Outcome, OutlineError> {
            let task = self
                .get_mut(id)
                .ok_or_else(|| OutlineError::NotFound(id.clone()))?;
            if !task.has_children() {
                return Ok(Outcome::unchanged());
            }
            task.collapsed = !task.collapsed;
            Ok(Outcome::changed(None))
        }

        pub fn set_collapsed(&mut self, id: &TaskId, collapsed: bool) -> Result<Outcome, OutlineError> {
            let task = self
                .get_mut(id)
                .ok_or_else(|| OutlineError::NotFound(id.clone()))?;
            if !task.has_children() || task.collapsed == collapsed {
                return Ok(Outcome::unchanged());
            }
            task.collapsed = collapsed;
            Ok(Outcome::changed(None))
        }

        fn require(&self, id: &TaskId) -> Result<TaskLocation, OutlineError> {
            self.locate(id)
                .ok_or_else(|| OutlineError::NotFound(id.clone()))
        }

        fn siblings_of(
            &mut self,
            id: &TaskId,
        ) -> Result<(TaskLocation, &mut Vec<Task>), OutlineError> {
            let loc = self.require(id)?;
            let seq = self
                .sequence_mut(&loc.parent_path)
                .ok_or_else(|| OutlineError::NotFound(id.clone()))?;
            Ok((loc, seq))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::export::export_json;
        use crate::ordering::is_ordered;
        use crate::validate::parse_outline;
        use chrono::NaiveDate;
        use std::collections::HashSet;

        fn t(id: &str, date: Option<&str>, subtasks: Vec<Task>) -> Task {
            Task {
                id: TaskId::from(id),
                date: date.map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()),
                text: format!("text {id}"),
                subtasks,
                collapsed: false,
            }
        }

        fn id(s: &str) -> TaskId {
            TaskId::from(s)
        }

        fn ids(tasks: &[Task]) -> Vec<&str> {
            tasks.iter().map(|t| t.id.as_str()).collect()
        }

        fn flat() -> Outline {
            Outline::from_tasks(vec![
                t("a", None, vec![]),
                t("b", None, vec![]),
                t("c", None, vec![]),
                t("d", None, vec![]),
            ])
        }

        fn assert_tree_sound(outline: &Outline) {
            let all = outline.all_tasks();
            let unique: HashSet<_> = all.iter().map(|t| &t.id).collect();
            assert_eq!(unique.len(), all.len(), "duplicate ids");
            fn ordered(tasks: &[Task]) -> bool {
                is_ordered(tasks) && tasks.iter().all(|t| ordered(&t.subtasks))
            }
            assert!(ordered(&outline.tasks), "unordered sibling sequence");
        }

        #[test]
        fn root_task_is_appended_and_ordered() {
            let mut outline = Outline::from_tasks(vec![t("undated", None, vec![])]);
            let outcome = outline.insert_root_task(Some("2024-03-01"), "dated").unwrap();
            let new_id = outcome.focus.expect("focus");
            assert_eq!(outline.tasks[0].id, new_id);
            assert_eq!(outline.tasks[0].text, "dated");
            assert!(!outline.tasks[0].collapsed);
            assert_eq!(outline.tasks[1].id, id("undated"));
        }

        #[test]
        fn root_task_with_invalid_date_is_rejected() {
            let mut outline = Outline::new();
            let err = outline.insert_root_task(Some("2024-02-30"), "x").unwrap_err();
            assert!(matches!(err, OutlineError::InvalidDate(_)));
            assert!(outline.is_empty());
        }

        #[test]
        fn subtask_is_appended_and_parent_expanded() {
            let mut outline = Outline::from_tasks(vec![t("p", None, vec![t("c1", None, vec![])])]);
            outline.tasks[0].collapsed = true;
            let outcome = outline.add_subtask(&id("p")).unwrap();
            let parent = &outline.tasks[0];
            assert!(!parent.collapsed);
            assert_eq!(parent.subtasks.len(), 2);
            assert_eq!(Some(&parent.subtasks[1].id), outcome.focus.as_ref());
            assert_eq!(parent.subtasks[1].text, "");
        }

        #[test]
        fn sibling_inherits_date_and_lands_after_reference() {
            let mut outline = Outline::from_tasks(vec![
                t("x", Some("2024-01-01"), vec![]),
                t("y", Some("2024-01-01"), vec![]),
                t("z", None, vec![]),
            ]);
            let new_id = outline.insert_sibling_after(&id("x")).unwrap().focus.unwrap();
            assert_eq!(outline.tasks[1].id, new_id);
            assert_eq!(outline.tasks[1].date, outline.tasks[0].date);
            assert_eq!(outline.tasks[2].id, id("y"));
        }

        #[test]
        fn delete_removes_whole_subtree() {
            let mut outline = Outline::from_tasks(vec![
                t("p", None, vec![t("c", None, vec![t("g", None, vec![])])]),
                t("q", None, vec![]),
            ]);
            outline.delete_task(&id("p")).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["q"]);
            assert!(outline.locate(&id("g")).is_none());
        }

        #[test]
        fn delete_of_unknown_id_reports_not_found() {
            let mut outline = flat();
            let err = outline.delete_task(&id("ghost")).unwrap_err();
            assert!(matches!(err, OutlineError::NotFound(ref missing) if missing == &id("ghost")));
            assert_eq!(err.to_string(), "Task not found.");
            assert_eq!(outline, flat());
        }

        #[test]
        fn copy_mints_new_ids_and_inserts_after_original() {
            let mut original = t("p", Some("2024-04-01"), vec![t("c1", None, vec![]), t("c2", None, vec![])]);
            original.collapsed = true;
            let mut outline = Outline::from_tasks(vec![original, t("q", None, vec![])]);
            let before = outline.ids();

            let copy_id = outline.copy_subtree(&id("p")).unwrap().focus.unwrap();

            assert_eq!(outline.tasks.len(), 3);
            let copy = &outline.tasks[1];
            assert_eq!(copy.id, copy_id);
            assert_eq!(copy.text, "text p");
            assert_eq!(copy.date, outline.tasks[0].date);
            assert!(copy.collapsed);
            assert_eq!(copy.subtasks.len(), 2);
            assert_eq!(copy.subtasks[0].text, "text c1");

            let mut copied_ids = Vec::new();
            copy.walk(&mut copied_ids);
            assert_eq!(copied_ids.len(), 3);
            assert!(copied_ids.iter().all(|t| !before.contains(&t.id)));
            assert_tree_sound(&outline);
        }

        #[test]
        fn indent_on_first_sibling_is_a_no_op() {
            let mut outline = flat();
            let outcome = outline.indent(&id("a")).unwrap();
            assert!(!outcome.changed);
            assert_eq!(outline, flat());
        }

        #[test]
        fn indent_appends_to_previous_sibling_and_expands_it() {
            let mut outline = Outline::from_tasks(vec![
                t("a", None, vec![t("a1", None, vec![])]),
                t("b", None, vec![]),
            ]);
            outline.tasks[0].collapsed = true;
            let outcome = outline.indent(&id("b")).unwrap();
            assert_eq!(outcome.focus, Some(id("b")));
            assert_eq!(ids(&outline.tasks), vec!["a"]);
            assert_eq!(ids(&outline.tasks[0].subtasks), vec!["a1", "b"]);
            assert!(!outline.tasks[0].collapsed);
        }

        #[test]
        fn outdent_on_root_task_is_a_no_op() {
            let mut outline = flat();
            assert!(!outline.outdent(&id("c")).unwrap().changed);
            assert_eq!(outline, flat());
        }

        #[test]
        fn outdent_places_task_right_after_former_parent() {
            let mut outline = Outline::from_tasks(vec![
                t("a", None, vec![t("a1", None, vec![]), t("a2", None, vec![])]),
                t("b", None, vec![]),
            ]);
            outline.outdent(&id("a1")).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["a", "a1", "b"]);
            assert_eq!(ids(&outline.tasks[0].subtasks), vec!["a2"]);
        }

        #[test]
        fn outdent_reorders_the_grandparent_sequence() {
            let mut outline = Outline::from_tasks(vec![
                t("a", Some("2024-01-01"), vec![t("late", None, vec![])]),
                t("b", Some("2024-02-01"), vec![]),
            ]);
            outline.outdent(&id("late")).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["a", "b", "late"]);
        }

        #[test]
        fn indent_keeps_untouched_siblings_in_order() {
            let mut outline = flat();
            outline.indent(&id("c")).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["a", "b", "d"]);
            assert_eq!(ids(&outline.tasks[1].subtasks), vec!["c"]);
        }

        #[test]
        fn outdent_keeps_untouched_siblings_in_order() {
            let mut outline = Outline::from_tasks(vec![
                t("x", None, vec![]),
                t(
                    "p",
                    None,
                    vec![t("p1", None, vec![]), t("p2", None, vec![]), t("p3", None, vec![])],
                ),
                t("y", None, vec![]),
                t("z", None, vec![]),
            ]);
            outline.outdent(&id("p2")).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["x", "p", "p2", "y", "z"]);
            assert_eq!(ids(&outline.tasks[1].subtasks), vec!["p1", "p3"]);
        }

        #[test]
        fn indent_then_outdent_round_trips() {
            let mut outline = flat();
            outline.indent(&id("b")).unwrap();
            outline.outdent(&id("b")).unwrap();
            assert_eq!(outline, flat());
        }

        #[test]
        fn move_below_a_later_target_accounts_for_removal() {
            let mut outline = flat();
            outline.move_task(&id("a"), &id("c"), Placement::Below).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["b", "c", "a", "d"]);

            let mut outline = flat();
            outline.move_task(&id("a"), &id("c"), Placement::Above).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["b", "a", "c", "d"]);
        }

        #[test]
        fn move_toward_an_earlier_target() {
            let mut outline = flat();
            outline.move_task(&id("d"), &id("b"), Placement::Above).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["a", "d", "b", "c"]);

            let mut outline = flat();
            outline.move_task(&id("d"), &id("a"), Placement::Below).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["a", "d", "b", "c"]);
        }

        #[test]
        fn move_onto_itself_does_nothing() {
            let mut outline = flat();
            assert!(!outline.move_task(&id("b"), &id("b"), Placement::Above).unwrap().changed);
            assert_eq!(outline, flat());
        }

        #[test]
        fn move_of_unknown_id_onto_itself_reports_not_found() {
            let mut outline = flat();
            let err = outline
                .move_task(&id("ghost"), &id("ghost"), Placement::Above)
                .unwrap_err();
            assert!(matches!(err, OutlineError::NotFound(ref missing) if missing == &id("ghost")));

            let err = Outline::new()
                .move_task(&id("ghost"), &id("ghost"), Placement::Below)
                .unwrap_err();
            assert_eq!(err.to_string(), "Task not found.");
            assert_eq!(outline, flat());
        }

        #[test]
        fn move_across_date_groups_is_rejected() {
            let tree = Outline::from_tasks(vec![
                t("x", Some("2024-01-01"), vec![]),
                t("y", Some("2024-02-01"), vec![]),
                t("n", None, vec![]),
            ]);
            let mut outline = tree.clone();
            let err = outline.move_task(&id("x"), &id("y"), Placement::Below).unwrap_err();
            assert!(matches!(err, OutlineError::MoveNotAllowed { .. }));
            assert!(outline.move_task(&id("n"), &id("x"), Placement::Above).is_err());
            assert_eq!(outline, tree);
        }

        #[test]
        fn move_across_parents_is_rejected() {
            let tree = Outline::from_tasks(vec![
                t("a", None, vec![t("a1", None, vec![])]),
                t("b", None, vec![]),
            ]);
            let mut outline = tree.clone();
            let err = outline.move_task(&id("a1"), &id("b"), Placement::Above).unwrap_err();
            assert!(matches!(err, OutlineError::MoveNotAllowed { .. }));
            // A task can never be dropped among its own descendants.
            assert!(outline.move_task(&id("a"), &id("a1"), Placement::Below).is_err());
            assert_eq!(outline, tree);
        }

        #[test]
        fn set_date_validates_then_reorders() {
            let mut outline = Outline::from_tasks(vec![
                t("a", Some("2024-01-01"), vec![]),
                t("b", None, vec![]),
            ]);
            let err = outline.set_date(&id("b"), Some("2024-02-30")).unwrap_err();
            assert!(matches!(err, OutlineError::InvalidDate(_)));
            assert_eq!(ids(&outline.tasks), vec!["a", "b"]);

            outline.set_date(&id("b"), Some("2023-12-31")).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["b", "a"]);

            outline.set_date(&id("b"), None).unwrap();
            assert_eq!(ids(&outline.tasks), vec!["a", "b"]);
            assert_eq!(outline.tasks[1].date, None);
        }

        #[test]
        fn set_text_is_verbatim() {
            let mut outline = flat();
            outline.set_text(&id("a"), "  spaced  ".into()).unwrap();
            assert_eq!(outline.tasks[0].text, "  spaced  ");
            outline.set_text(&id("a"), String::new()).unwrap();
            assert_eq!(outline.tasks[0].text, "");
        }

        #[test]
        fn collapse_toggles_only_tasks_with_children() {
            let mut outline = Outline::from_tasks(vec![
                t("p", None, vec![t("c", None, vec![])]),
                t("leaf", None, vec![]),
            ]);
            assert!(!outline.toggle_collapsed(&id("leaf")).unwrap().changed);
            assert!(!outline.tasks[1].collapsed);

            outline.toggle_collapsed(&id("p")).unwrap();
            assert!(outline.tasks[0].collapsed);
            assert!(!outline.set_collapsed(&id("p"), true).unwrap().changed);
            outline.set_collapsed(&id("p"), false).unwrap();
            assert!(!outline.tasks[0].collapsed);
        }

        #[test]
        fn commands_keep_ids_unique_and_sequences_ordered() {
            let mut outline = Outline::new();
            let a = outline
                .apply(Command::AddRoot {
                    date: Some("2024-05-05".into()),
                    text: "a".into(),
                })
                .unwrap()
                .focus
                .unwrap();
            let b = outline
                .apply(Command::AddRoot {
                    date: None,
                    text: "b".into(),
                })
                .unwrap()
                .focus
                .unwrap();
            let child = outline
                .apply(Command::AddSubtask { parent: a.clone() })
                .unwrap()
                .focus
                .unwrap();
            let a_copy = outline
                .apply(Command::Copy { id: a.clone() })
                .unwrap()
                .focus
                .unwrap();
            outline.apply(Command::Copy { id: child.clone() }).unwrap();
            outline.apply(Command::Indent { id: b.clone() }).unwrap();
            outline
                .apply(Command::SetDate {
                    id: child.clone(),
                    date: Some("2020-01-01".into()),
                })
                .unwrap();
            outline.apply(Command::Outdent { id: child.clone() }).unwrap();
            outline
                .apply(Command::Move {
                    id: a_copy.clone(),
                    target: a.clone(),
                    placement: Placement::Above,
                })
                .unwrap();
            outline
                .apply(Command::SetAllCollapsed { collapsed: true })
                .unwrap();

            assert_eq!(outline.task_count(), 6);
            assert_tree_sound(&outline);
            let roots: Vec<&TaskId> = outline.tasks.iter().map(|t| &t.id).collect();
            assert_eq!(roots, vec![&child, &a_copy, &a]);

            let exported = export_json(&outline).unwrap();
            assert_eq!(parse_outline(&exported).unwrap(), outline);
        }
    }
}

pub mod validate {
    //! Turns untrusted JSON into a well-formed outline. Nothing here touches live state:
    //! a document either validates completely or is rejected.

    use crate::core::{Outline, Task, TaskId, ValidationError};
    use crate::dates::parse_iso_date;
    use crate::ordering::order_recursive;
    use indexmap::IndexMap;
    use serde_json::Value;
    use std::collections::HashSet;

    /// Hands out ids during validation. Supplied ids are kept only while they stay
    /// unique; collisions get a fresh id and are recorded.
    #[derive(Debug, Default)]
    pub struct IdRegistry {
        used: HashSet<TaskId>,
        /// Fresh id -> the supplied id it replaced, in document order.
        reassigned: IndexMap<TaskId, String>,
    }

    impl IdRegistry {
        /// Registry that already treats every id in `outline` as taken.
        pub fn seeded_from(outline: &Outline) -> Self {
            Self {
                used: outline.ids(),
                reassigned: IndexMap::new(),
            }
        }

        pub fn claim(&mut self, supplied: Option<&str>) -> TaskId {
            match supplied {
                Some(raw) if !raw.is_empty() => {
                    let candidate = TaskId::from(raw);
                    if self.used.insert(candidate.clone()) {
                        return candidate;
                    }
                    let fresh = self.mint();
                    self.reassigned.insert(fresh.clone(), raw.to_string());
                    fresh
                }
                _ => self.mint(),
            }
        }

        fn mint(&mut self) -> TaskId {
            loop {
                let id = TaskId::new();
                if self.used.insert(id.clone()) {
                    return id;
                }
            }
        }

        pub fn into_reassigned(self) -> IndexMap<TaskId, String> {
            self.reassigned
        }
    }

    /// A validated document plus the ids that had to be replaced.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ImportedOutline {
        pub outline: Outline,
        pub reassigned: IndexMap<TaskId, String>,
    }

    pub fn validate_task(raw: &Value, ids: &mut IdRegistry) -> Result<Task, ValidationError> {
        let obj = raw.as_object().ok_or(ValidationError::BadTask)?;

        let id = ids.claim(obj.get("id").and_then(Value::as_str));

        let date = match obj.get("date") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(
                parse_iso_date(s).ok_or_else(|| ValidationError::InvalidDate(s.clone()))?,
            ),
            Some(other) => return Err(ValidationError::InvalidDate(other.to_string())),
        };

        let text = obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let collapsed = truthy(obj.get("collapsed"));

        let subtasks = match obj.get("subtasks") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| validate_task(item, ids))
                .collect::<Result<Vec<_>, _>>()?,
            _ => vec![],
        };

        Ok(Task {
            id,
            date,
            text,
            subtasks,
            collapsed,
        })
    }

    /// Validate a whole document and apply the full date ordering to every level.
    pub fn validate_outline(raw: &Value) -> Result<Outline, ValidationError> {
        validate_import(raw, None).map(|imported| imported.outline)
    }

    /// Like [`validate_outline`], but ids already present in `existing` count as taken
    /// (used when the result is merged into a live outline).
    pub fn validate_import(
        raw: &Value,
        existing: Option<&Outline>,
    ) -> Result<ImportedOutline, ValidationError> {
        let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;
        let mut ids = existing.map(IdRegistry::seeded_from).unwrap_or_default();

        let mut tasks = match obj.get("tasks") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| validate_task(item, &mut ids))
                .collect::<Result<Vec<_>, _>>()?,
            _ => vec![],
        };
        order_recursive(&mut tasks);

        Ok(ImportedOutline {
            outline: Outline::from_tasks(tasks),
            reassigned: ids.into_reassigned(),
        })
    }

    pub fn parse_outline(text: &str) -> Result<Outline, ValidationError> {
        let raw: Value = serde_json::from_str(text)?;
        validate_outline(&raw)
    }

    /// JSON-value truthiness for loosely typed flags.
    fn truthy(value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|x| x != 0.0 && !x.is_nan()),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        }
    }

}

pub mod export {
    //! Export file shape and naming. The export payload is byte-for-byte the store blob.

    use crate::core::Outline;
    use chrono::NaiveDateTime;

    /// Pretty JSON, two-space indentation, fields in `id, date, text, subtasks, collapsed` order.
    pub fn export_json(outline: &Outline) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(outline)
    }

    /// `todo_backup_<YYYY>-<MM>-<DD>_<HHMM>.json` for a local timestamp.
    pub fn export_file_name(stamp: NaiveDateTime) -> String {
        stamp.format("todo_backup_%Y-%m-%d_%H%M.json").to_string()
    }

}

pub mod storage {
    //! Opaque blob persistence. The whole outline is read and written as one value;
    //! there are no partial updates.

    use anyhow::{Context, Result};
    use std::{
        cell::RefCell,
        fs,
        path::{Path, PathBuf},
    };

    /// Store key; also the default file stem.
    pub const STORAGE_KEY: &str = "outline_todo_v1";

    pub trait OutlineStore {
        /// Read the entire blob as raw bytes, `None` when nothing has been stored yet.
        /// Decoding is the caller's job, so a garbled blob is not an I/O error.
        fn load_blob(&self) -> Result<Option<Vec<u8>>>;

        /// Replace the entire blob.
        fn save_blob(&self, blob: &str) -> Result<()>;
    }

    /// Store backed by a single JSON file on disk.
    #[derive(Debug, Clone)]
    pub struct FileStore {
        path: PathBuf,
    }

    impl FileStore {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// `<data dir>/outline/outline_todo_v1.json`, or the working directory when the
        /// platform has no data dir.
        pub fn default_path() -> PathBuf {
            dirs::data_dir()
                .map(|dir| dir.join("outline"))
                .unwrap_or_else(|| PathBuf::from("."))
                .join(format!("{STORAGE_KEY}.json"))
        }
    }

    impl OutlineStore for FileStore {
        fn load_blob(&self) -> Result<Option<Vec<u8>>> {
            if !self.path.exists() {
                return Ok(None);
            }
            let bytes = fs::read(&self.path).with_context(|| format!("reading {:?}", self.path))?;
            Ok(Some(bytes))
        }

        fn save_blob(&self, blob: &str) -> Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating {:?}", parent))?;
                }
            }
            // Write beside the target and rename so readers never see half a blob.
            let tmp = self.path.with_extension("json.tmp");
            fs::write(&tmp, blob.as_bytes()).with_context(|| format!("writing {:?}", tmp))?;
            fs::rename(&tmp, &self.path)
                .with_context(|| format!("replacing {:?}", self.path))?;
            Ok(())
        }
    }

    /// In-process store, handy for embedding and tests.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        blob: RefCell<Option<Vec<u8>>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_blob(blob: impl Into<Vec<u8>>) -> Self {
            Self {
                blob: RefCell::new(Some(blob.into())),
            }
        }

        /// Current blob as text; `None` when empty or not UTF-8.
        pub fn blob(&self) -> Option<String> {
            self.blob
                .borrow()
                .as_ref()
                .and_then(|bytes| String::from_utf8(bytes.clone()).ok())
        }
    }

    impl OutlineStore for MemoryStore {
        fn load_blob(&self) -> Result<Option<Vec<u8>>> {
            Ok(self.blob.borrow().clone())
        }

        fn save_blob(&self, blob: &str) -> Result<()> {
            *self.blob.borrow_mut() = Some(blob.as_bytes().to_vec());
            Ok(())
        }
    }

}

pub mod session {
    //! Application state: the live outline, the active selection, and the single
    //! in-flight import slot. Every write goes through here so that no command can
    //! interleave with a pending import.

    use crate::core::{Outline, OutlineError, TaskId, ValidationError};
    use crate::export::export_json;
    use crate::mutation::{Command, Outcome};
    use crate::ordering::order_siblings;
    use crate::storage::OutlineStore;
    use crate::validate::{ImportedOutline, validate_import, validate_outline};
    use indexmap::IndexMap;
    use serde_json::Value;
    use tracing::{debug, warn};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ImportMode {
        /// Replace the whole outline.
        Replace,
        /// Append the imported root tasks to the existing root sequence.
        Merge,
    }

    /// Who triggered a command. Internal callers may hold stale ids; for them a
    /// missing task is silently ignored.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Origin {
        User,
        Internal,
    }

    /// Proof that the import slot is held. Obtained from [`Session::begin_import`].
    #[derive(Debug, PartialEq, Eq)]
    pub struct ImportTicket {
        serial: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ImportSummary {
        pub mode: ImportMode,
        pub root_tasks: usize,
        pub total_tasks: usize,
        /// Fresh id -> supplied id, for every imported id that collided.
        pub reassigned: IndexMap<TaskId, String>,
    }

    /// The stored blob could not be used; the session started from an empty outline.
    #[derive(Debug, thiserror::Error)]
    #[error("Stored data was corrupted; started with a fresh list.")]
    pub struct CorruptStore {
        #[source]
        pub reason: ValidationError,
    }

    #[derive(Debug, Default)]
    pub struct Session {
        outline: Outline,
        active: Option<TaskId>,
        pending_import: Option<u64>,
        next_ticket: u64,
    }

    impl Session {
        pub fn new(outline: Outline) -> Self {
            Self {
                outline,
                ..Self::default()
            }
        }

        /// Load from `store`, falling back to an empty outline when the blob does not
        /// decode, then write it back. Decoding already orders every level.
        pub fn load(store: &dyn OutlineStore) -> Result<(Self, Option<CorruptStore>), OutlineError> {
            let (outline, warning) = match store.load_blob()? {
                None => (Outline::new(), None),
                Some(blob) => match decode(&blob) {
                    Ok(outline) => (outline, None),
                    Err(reason) => {
                        warn!(error = %reason, "discarding corrupted store");
                        (Outline::new(), Some(CorruptStore { reason }))
                    }
                },
            };
            let session = Self::new(outline);
            session.save(store)?;
            Ok((session, warning))
        }

        pub fn save(&self, store: &dyn OutlineStore) -> Result<(), OutlineError> {
            store.save_blob(&self.export_json()?)?;
            Ok(())
        }

        pub fn export_json(&self) -> Result<String, OutlineError> {
            export_json(&self.outline).map_err(|e| OutlineError::Storage(e.into()))
        }

        pub fn outline(&self) -> &Outline {
            &self.outline
        }

        pub fn active(&self) -> Option<&TaskId> {
            self.active.as_ref()
        }

        /// Select a task (or clear the selection with `None`).
        pub fn select(&mut self, id: Option<TaskId>) -> Result<(), OutlineError> {
            if let Some(id) = &id {
                if self.outline.locate(id).is_none() {
                    return Err(OutlineError::NotFound(id.clone()));
                }
            }
            self.active = id;
            Ok(())
        }

        pub fn is_import_pending(&self) -> bool {
            self.pending_import.is_some()
        }

        pub fn dispatch(&mut self, command: Command, origin: Origin) -> Result<Outcome, OutlineError> {
            if self.pending_import.is_some() {
                return Err(OutlineError::Busy);
            }
            match self.outline.apply(command) {
                Ok(outcome) => {
                    if let Some(focus) = &outcome.focus {
                        self.active = Some(focus.clone());
                    }
                    self.retain_selection();
                    Ok(outcome)
                }
                Err(OutlineError::NotFound(id)) if origin == Origin::Internal => {
                    debug!(task = %id, "ignoring command for stale task id");
                    Ok(Outcome::unchanged())
                }
                Err(err) => Err(err),
            }
        }

        /// Claim the import slot before reading an external file. Commands are refused
        /// until the ticket is finished or abandoned.
        pub fn begin_import(&mut self) -> Result<ImportTicket, OutlineError> {
            if self.pending_import.is_some() {
                return Err(OutlineError::Busy);
            }
            self.next_ticket += 1;
            self.pending_import = Some(self.next_ticket);
            Ok(ImportTicket {
                serial: self.next_ticket,
            })
        }

        /// Release the slot without importing (the file could not be read).
        pub fn abandon_import(&mut self, ticket: ImportTicket) {
            if self.pending_import == Some(ticket.serial) {
                self.pending_import = None;
            }
        }

        /// Validate `text` completely, then replace or merge. On any failure the live
        /// outline is untouched. The slot is released either way.
        pub fn finish_import(
            &mut self,
            ticket: ImportTicket,
            text: &str,
            mode: ImportMode,
        ) -> Result<ImportSummary, OutlineError> {
            if self.pending_import != Some(ticket.serial) {
                return Err(OutlineError::Busy);
            }
            self.pending_import = None;

            let raw: Value = serde_json::from_str(text).map_err(ValidationError::from)?;
            let seed = match mode {
                ImportMode::Merge => Some(&self.outline),
                ImportMode::Replace => None,
            };
            let ImportedOutline {
                outline: incoming,
                reassigned,
            } = validate_import(&raw, seed)?;

            let root_tasks = incoming.tasks.len();
            let total_tasks = incoming.task_count();
            match mode {
                ImportMode::Replace => self.outline = incoming,
                ImportMode::Merge => {
                    self.outline.tasks.extend(incoming.tasks);
                    order_siblings(&mut self.outline.tasks);
                }
            }
            self.retain_selection();
            debug!(?mode, root_tasks, total_tasks, reassigned = reassigned.len(), "imported outline");

            Ok(ImportSummary {
                mode,
                root_tasks,
                total_tasks,
                reassigned,
            })
        }

        /// Import text that is already in memory.
        pub fn import_str(&mut self, text: &str, mode: ImportMode) -> Result<ImportSummary, OutlineError> {
            let ticket = self.begin_import()?;
            self.finish_import(ticket, text, mode)
        }

        fn retain_selection(&mut self) {
            if let Some(active) = &self.active {
                if self.outline.locate(active).is_none() {
                    self.active = None;
                }
            }
        }
    }

    fn decode(blob: &[u8]) -> Result<Outline, ValidationError> {
        let raw: Value = serde_json::from_slice(blob)?;
        validate_outline(&raw)
    }

}

pub mod render {
    //! Read model for views: the outline flattened in display order.

    use crate::core::{Outline, Task, TaskId};
    use crate::dates::format_for_display;
    use crate::markers::marker_for;
    use chrono::NaiveDate;
    use serde::Serialize;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct RenderRow {
        pub id: TaskId,
        pub depth: usize,
        pub marker: String,
        /// Display form of the date; `None` when the task is undated.
        pub date: Option<String>,
        pub text: String,
        pub collapsed: bool,
        pub child_count: usize,
        /// Some ancestor is collapsed.
        pub hidden: bool,
    }

    /// `today` fixes the year used to shorten dates.
    pub fn rows(outline: &Outline, today: NaiveDate) -> Vec<RenderRow> {
        fn rec(
            tasks: &[Task],
            depth: usize,
            hidden: bool,
            today: NaiveDate,
            out: &mut Vec<RenderRow>,
        ) {
            for (i, t) in tasks.iter().enumerate() {
                out.push(RenderRow {
                    id: t.id.clone(),
                    depth,
                    marker: marker_for(depth, i),
                    date: t.date.map(|d| format_for_display(d, today)),
                    text: t.text.clone(),
                    collapsed: t.collapsed,
                    child_count: t.subtasks.len(),
                    hidden,
                });
                rec(
                    &t.subtasks,
                    depth + 1,
                    hidden || (t.collapsed && t.has_children()),
                    today,
                    out,
                );
            }
        }
        let mut out = Vec::new();
        rec(&outline.tasks, 0, false, today, &mut out);
        out
    }

    /// Plain-text tree of the visible rows, one task per line.
    pub fn render_text(outline: &Outline, today: NaiveDate) -> String {
        let mut s = String::new();
        for row in rows(outline, today).into_iter().filter(|r| !r.hidden) {
            let caret = match (row.child_count, row.collapsed) {
                (0, _) => ' ',
                (_, true) => '▶',
                (_, false) => '▼',
            };
            s.push_str(&"  ".repeat(row.depth));
            s.push(caret);
            s.push(' ');
            s.push_str(&row.marker);
            if let Some(date) = &row.date {
                s.push(' ');
                s.push_str(date);
            }
            if !row.text.is_empty() {
                s.push(' ');
                s.push_str(&row.text);
            }
            s.push_str(&format!("  [{}]\n", row.id));
        }
        s
    }

}

pub use crate::core::{Outline, OutlineError, Task, TaskId};
pub use mutation::{Command, Outcome, Placement};
pub use session::{ImportMode, Origin, Session};
