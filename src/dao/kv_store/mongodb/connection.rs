use std::{iter, time::Duration};

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::debug;

use super::error::{MongoDaoError, MongoResult};

/// How many pings to try before giving up on a MongoDB server, and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PingSchedule {
    attempts: u32,
    first_delay: Duration,
    max_delay: Duration,
}

impl PingSchedule {
    /// At boot the server may still be starting next to us.
    pub(super) const STARTUP: Self = Self {
        attempts: 10,
        first_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(5),
    };

    /// Reconnects are paced by the storage supervisor.
    pub(super) const SINGLE: Self = Self {
        attempts: 1,
        ..Self::STARTUP
    };

    fn delays(self) -> impl Iterator<Item = Duration> {
        let max_delay = self.max_delay;
        iter::successors(Some(self.first_delay), move |delay| {
            Some((*delay * 2).min(max_delay))
        })
        .take(self.attempts.saturating_sub(1) as usize)
    }
}

/// Build a client for `database_name` and return it once the server answers a ping.
pub(super) async fn open_database(
    options: &ClientOptions,
    database_name: &str,
    schedule: PingSchedule,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut delays = schedule.delays();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let Err(source) = database.run_command(doc! { "ping": 1 }).await else {
            return Ok((client, database));
        };
        let Some(delay) = delays.next() else {
            return Err(MongoDaoError::Unreachable { attempts, source });
        };
        debug!(
            attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %source,
            "MongoDB did not answer ping"
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_schedule_doubles_up_to_the_cap() {
        let delays: Vec<_> = PingSchedule::STARTUP
            .delays()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(
            delays,
            vec![250, 500, 1000, 2000, 4000, 5000, 5000, 5000, 5000]
        );
    }

    #[test]
    fn single_schedule_never_waits() {
        assert_eq!(PingSchedule::SINGLE.delays().count(), 0);
    }
}
