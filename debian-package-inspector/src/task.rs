// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Running blocking work under a time budget. */

use {
    crate::{
        error::{InspectError, Result},
        workdir::CancellationFlag,
    },
    std::time::Duration,
};

/// Run `f` on the blocking thread pool, failing with [InspectError::Timeout] if
/// it does not finish within `budget`.
///
/// When a `cancellation` flag is given it is raised on timeout and the worker
/// is awaited before returning, so nothing still writes into the working
/// directory once the caller sees the error. Without a flag the worker is
/// detached.
pub(crate) async fn run_blocking<T, F>(
    what: &'static str,
    budget: Duration,
    cancellation: Option<&CancellationFlag>,
    f: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(f);

    match tokio::time::timeout(budget, &mut handle).await {
        Ok(joined) => joined?,
        Err(_) => {
            if let Some(flag) = cancellation {
                flag.cancel();
                let _ = handle.await;
            }

            Err(InspectError::Timeout(what, budget))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_budget() -> Result<()> {
        let value = run_blocking("sum", Duration::from_secs(5), None, || Ok(2 + 2)).await?;
        assert_eq!(value, 4);

        Ok(())
    }

    #[tokio::test]
    async fn propagates_inner_error() {
        let res: Result<()> = run_blocking("read", Duration::from_secs(5), None, || {
            Err(InspectError::Read("nope".into()))
        })
        .await;

        assert!(matches!(res, Err(InspectError::Read(_))));
    }

    #[tokio::test]
    async fn timeout_raises_cancellation_and_waits() {
        let flag = CancellationFlag::default();
        let worker_flag = flag.clone();

        let res: Result<()> = run_blocking(
            "spin",
            Duration::from_millis(50),
            Some(&flag),
            move || {
                while !worker_flag.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(InspectError::Cancelled)
            },
        )
        .await;

        assert!(matches!(res, Err(InspectError::Timeout("spin", _))));
        assert!(flag.is_cancelled());
    }
}
