/*
 * Description: Task-local ambient trace context for the contextual client API.
 *
 * Copyright (C) 2022 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: GPL-3.0-or-later
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Task-local ambient trace context.
//!
//! Realizes the design note's "per-task context slot, NOT global mutable state" with
//! `tokio::task_local!`. Every task that wants to use the contextual API must be wrapped in
//! [`surface`] (directly or via a parent task that already is); child tasks do not inherit a
//! parent's task-local scope automatically and must be given the `Id` explicitly (e.g. via
//! `destructure`/`parse`, or by calling `surface` again in the child).

use crate::config::DebugContextPolicy;
use crate::error::TraceError;
use crate::id::Id;

use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
  static CURRENT_ID: RefCell<Id>;
}

thread_local! {
  static CURRENT_LOG_SPAN: RefCell<Option<tracing::span::EnteredSpan>> = const { RefCell::new(None) };
}

/// Run `future` with `id` established as the current task's ambient trace context.
pub async fn surface<F, T>(id: Id, future: F) -> T
where
  F: Future<Output = T>,
{
  let trace_id_hex = id.trace_id().to_hex();
  let span = tracing::info_span!("trace", trace_id = %trace_id_hex);
  let _entered = span.enter();
  CURRENT_ID.scope(RefCell::new(id), future).await
}

/// Set this thread's ambient logging span, recording `trace_id_hex` under the `trace_id` field.
///
/// The functional API's `start`/`join` are plain calls that return before the rest of the
/// caller's work runs, so there is no future to hand `CURRENT_ID`-style task-local scoping.
/// Instead this enters a span and parks the guard in thread-local storage until
/// `clear_trace_id_log_key` drops it, giving every `tracing` event emitted on this thread in the
/// meantime the `trace_id` field. A stale guard from an unfinished trace is replaced, not leaked.
pub fn set_trace_id_log_key(trace_id_hex: &str) {
  let span = tracing::info_span!("trace", trace_id = %trace_id_hex).entered();
  CURRENT_LOG_SPAN.with(|cell| *cell.borrow_mut() = Some(span));
}

/// Clear this thread's ambient logging span, if one is set.
pub fn clear_trace_id_log_key() {
  CURRENT_LOG_SPAN.with(|cell| cell.borrow_mut().take());
}

/// Read the current task's ambient `Id`, applying `policy` if none is present.
pub fn submerge(policy: DebugContextPolicy) -> Result<Id, TraceError> {
  match CURRENT_ID.try_with(|cell| cell.borrow().clone()) {
    Ok(id) => Ok(id),
    Err(_) => match policy {
      DebugContextPolicy::Silent => Ok(Id::ignore()),
      DebugContextPolicy::Warn => {
        tracing::warn!("no trace context present in this task; returning ignore sentinel");
        Ok(Id::ignore())
      },
      DebugContextPolicy::Raise => Err(TraceError::MissingContext),
    },
  }
}

/// Overwrite the current task's ambient `Id` in place, if one is present.
///
/// A no-op (not an error) if no context is present: this is used internally by the contextual
/// API after an operation returns an updated `Id`, and a caller who never surfaced a context has
/// nothing to update.
pub fn replace(id: Id) {
  let _ = CURRENT_ID.try_with(|cell| *cell.borrow_mut() = id);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::id::{OriginParent, SpanId, TraceId};

  fn sample_id() -> Id {
    Id::init(TraceId::generate(), SpanId::generate(), OriginParent::Root, true, false)
  }

  #[tokio::test]
  async fn surfaced_id_is_readable_inside_scope() {
    let id = sample_id();
    let trace_id = id.trace_id();
    surface(id, async {
      let current = submerge(DebugContextPolicy::Raise).unwrap();
      assert_eq!(current.trace_id(), trace_id);
    })
    .await;
  }

  #[tokio::test]
  async fn missing_context_silent_returns_ignore() {
    let result = submerge(DebugContextPolicy::Silent).unwrap();
    assert!(result.is_ignored());
  }

  #[tokio::test]
  async fn missing_context_raise_errors() {
    assert!(matches!(submerge(DebugContextPolicy::Raise), Err(TraceError::MissingContext)));
  }

  #[tokio::test]
  async fn replace_updates_visible_context() {
    let id = sample_id();
    surface(id.clone(), async {
      let pushed = id.push(SpanId::generate());
      replace(pushed.clone());
      let current = submerge(DebugContextPolicy::Raise).unwrap();
      assert_eq!(current, pushed);
    })
    .await;
  }

  #[tokio::test]
  async fn log_key_is_entered_then_cleared() {
    clear_trace_id_log_key();
    assert!(CURRENT_LOG_SPAN.with(|cell| cell.borrow().is_none()));

    set_trace_id_log_key("abcd1234");
    assert!(CURRENT_LOG_SPAN.with(|cell| cell.borrow().is_some()));

    clear_trace_id_log_key();
    assert!(CURRENT_LOG_SPAN.with(|cell| cell.borrow().is_none()));
  }
}
