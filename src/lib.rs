//! # HabitQuest
//!
//! Recurring task and habit tracking on top of the HabitQuest task API.
//!
//! Tasks may repeat daily, weekly, biweekly or monthly. The backend expands a
//! recurring task into one instance per occurrence, all linked to the
//! originating task; together they form a *lineage*. Edits and deletes apply
//! either to one instance or to that instance and every later one in its
//! lineage, never to earlier ones.
//!
//! [`store::TaskStore`] is the entry point: it holds the task list and talks
//! to any [`api::TaskApi`], either [`api::HttpTaskApi`] for the REST service
//! or [`api::LocalTaskApi`] for an in-process backend stored as JSON.

pub mod api;
pub mod commands;
pub mod config;
pub mod lineage;
pub mod logging;
pub mod models;
pub mod notify;
pub mod store;
pub mod tui;
