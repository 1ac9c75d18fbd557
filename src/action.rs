//! Waiting for asynchronous remote actions.
//!
//! Mutating calls hand back an [`Action`]. The platform drives it to a
//! terminal state; the provider only observes. [`watch_progress`] subscribes to
//! an action and [`wait_for_action`] suspends until it finishes, returning the
//! action's own failure unchanged.

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::api::CloudApi;
use crate::client::{Client, ResourceRef};
use crate::error::{ApiError, ErrorCode};
use crate::models::{Action, ActionStatus};

/// One update from an action watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionProgress {
    /// Still running, with the reported percentage.
    Running(u8),
    /// Reached the success state.
    Done,
}

/// Progress updates of one action.
///
/// Yields `Ok(ActionProgress::Running(percent))` while the action runs, then
/// exactly one terminal item: `Ok(ActionProgress::Done)` on success or an
/// `Err` on failure. A stream that ends without a terminal item means the
/// watcher died and says nothing about the action.
pub type ActionProgressStream = ReceiverStream<Result<ActionProgress, ApiError>>;

/// Subscribe to the progress of an action.
///
/// A background task polls the action once per poll interval until it
/// reaches a terminal state or the stream is dropped.
pub fn watch_progress<C: CloudApi + ?Sized>(
    client: &Client<C>,
    action: &Action,
) -> ActionProgressStream {
    let (tx, rx) = mpsc::channel(1);
    let api = client.api_arc();
    let poll_interval = client.poll_interval();
    let action_id = action.id;
    let command = action.command.clone();

    tokio::spawn(async move {
        let mut ticker = time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let current = match api.get_action(action_id).await {
                Ok(Some(current)) => current,
                Ok(None) => {
                    let err = ApiError::not_found(format!("action {} not found", action_id));
                    let _ = tx.send(Err(err)).await;
                    return;
                },
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                },
            };

            match current.status {
                ActionStatus::Running => {
                    if tx
                        .send(Ok(ActionProgress::Running(current.progress)))
                        .await
                        .is_err()
                    {
                        // Subscriber went away.
                        return;
                    }
                },
                ActionStatus::Success => {
                    let _ = tx.send(Ok(ActionProgress::Done)).await;
                    return;
                },
                ActionStatus::Error => {
                    let err = match current.error {
                        Some(error) => ApiError::action_failed(command, error.code, error.message),
                        None => ApiError::action_failed(
                            command,
                            ErrorCode::Other("action_failed".to_string()),
                            "action failed without error details",
                        ),
                    };
                    let _ = tx.send(Err(err)).await;
                    return;
                },
            }
        }
    });

    ReceiverStream::new(rx)
}

/// Wait until an action finishes.
///
/// Returns the failure reported by the action verbatim. There is no local
/// timeout; a hung action blocks until the caller gives up. If the watcher
/// stops before the action reached a terminal state, that is an error too.
pub async fn wait_for_action<C: CloudApi + ?Sized>(
    client: &Client<C>,
    action: &Action,
    owner: ResourceRef,
) -> Result<(), ApiError> {
    info!(
        owner = %owner,
        command = %action.command,
        "{} waiting for {:?} action to complete", owner, action.command
    );

    let mut progress = watch_progress(client, action);
    while let Some(update) = progress.next().await {
        match update {
            Ok(ActionProgress::Running(percent)) => {
                debug!(owner = %owner, command = %action.command, progress = percent, "Action in progress");
            },
            Ok(ActionProgress::Done) => {
                info!(
                    owner = %owner,
                    command = %action.command,
                    "{} {:?} action succeeded", owner, action.command
                );
                return Ok(());
            },
            Err(err) => {
                warn!(owner = %owner, command = %action.command, error = %err, "Action failed");
                return Err(err);
            },
        }
    }

    error!(
        owner = %owner,
        command = %action.command,
        "Stopped watching {:?} action before it finished", action.command
    );
    Err(ApiError::new(
        ErrorCode::Other("action_watch_aborted".to_string()),
        format!(
            "stopped watching action {} ({}) before it finished",
            action.id, action.command
        ),
    ))
}

/// Wait for a primary action and then each follow-up action in order.
///
/// Stops at the first failure; later actions are not awaited.
pub async fn wait_for_actions<C: CloudApi + ?Sized>(
    client: &Client<C>,
    primary: &Action,
    next_actions: &[Action],
    owner: ResourceRef,
) -> Result<(), ApiError> {
    wait_for_action(client, primary, owner).await?;
    for action in next_actions {
        wait_for_action(client, action, owner).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::models::LoadBalancerAttachToNetworkOpts;
    use crate::testing::{load_balancer_fixture, network_fixture, FakeCloud};

    fn client(fake: FakeCloud) -> Client<FakeCloud> {
        Client::new(Arc::new(fake)).with_poll_interval(Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_succeeds_after_polling() {
        let client = client(FakeCloud::new().with_action_polls(3));
        let action = client.api().start_action("create_volume");

        tokio_test::assert_ok!(wait_for_action(&client, &action, ResourceRef::volume(1)).await);
        assert_eq!(client.api().action_polls(action.id), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_stream_reports_percentages() {
        let client = client(FakeCloud::new().with_action_polls(3));
        let action = client.api().start_action("resize_volume");

        let updates: Vec<_> = watch_progress(&client, &action).collect().await;
        assert_eq!(
            updates,
            vec![
                Ok(ActionProgress::Running(33)),
                Ok(ActionProgress::Running(66)),
                Ok(ActionProgress::Done),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_action_is_returned_verbatim() {
        let fake = FakeCloud::new();
        fake.add_load_balancer(load_balancer_fixture(123));
        fake.add_network(network_fixture(456));
        fake.fail_action(
            "attach_to_network",
            ErrorCode::Other("action_failed".to_string()),
            "subnet is full",
        );
        let client = client(fake);

        let action = client
            .api()
            .attach_load_balancer_to_network(
                123,
                LoadBalancerAttachToNetworkOpts {
                    network: 456,
                    ip: None,
                },
            )
            .await
            .unwrap();

        let err = wait_for_action(&client, &action, ResourceRef::network(456))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::action_failed(
                "attach_to_network",
                ErrorCode::Other("action_failed".to_string()),
                "subnet is full",
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_actions_stops_at_first_failure() {
        let fake = FakeCloud::new();
        fake.fail_action("start_server", ErrorCode::Other("boot_failed".into()), "no disk");
        let client = client(fake);

        let primary = client.api().start_action("create_server");
        let failing = client.api().start_action("start_server");
        let never = client.api().start_action("attach_iso");

        let err = wait_for_actions(
            &client,
            &primary,
            &[failing.clone(), never.clone()],
            ResourceRef::server(1),
        )
        .await
        .unwrap_err();

        assert_eq!(err.action.as_deref(), Some("start_server"));
        assert_eq!(client.api().action_polls(primary.id), 1);
        assert_eq!(client.api().action_polls(never.id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_action_is_not_found() {
        let client = client(FakeCloud::new());
        let ghost = Action::running(999, "delete_server");

        let err = wait_for_action(&client, &ghost, ResourceRef::server(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_is_forwarded() {
        let fake = FakeCloud::new();
        let client = client(fake);
        let action = client.api().start_action("poweroff_server");
        client.api().fail_next(
            "get_action",
            ApiError::new(ErrorCode::ServiceError, "temporarily unavailable"),
        );

        let err = wait_for_action(&client, &action, ResourceRef::server(1))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ServiceError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_watcher_is_not_success() {
        let fake = FakeCloud::new().with_action_polls(3);
        let action = fake.start_action("attach_to_network");
        fake.crash_next("get_action");
        let client = client(fake);

        let err = wait_for_action(&client, &action, ResourceRef::network(456))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Other("action_watch_aborted".to_string()));
        assert!(err.message.contains("before it finished"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_still_reports_failure() {
        let fake = FakeCloud::new();
        fake.fail_action(
            "attach_to_network",
            ErrorCode::Other("action_failed".to_string()),
            "subnet is full",
        );
        let action = fake.start_action("attach_to_network");
        let client = Client::new(Arc::new(fake)).with_poll_interval(Duration::ZERO);

        let err = wait_for_action(&client, &action, ResourceRef::network(456))
            .await
            .unwrap_err();
        assert_eq!(err.message, "subnet is full");
    }
}
