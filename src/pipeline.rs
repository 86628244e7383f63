//! Commit pipeline: drains the internal commit stream into the upstream
//! apply channel.
//!
//! Replication and the AppendEntries handler emit [`ApplyMsg`] records into
//! an unbounded internal stream, which never blocks under the state lock.
//! This task alone forwards them — in log-index order — to the apply
//! channel supplied at construction, so upstream backpressure lands here
//! instead of in the leader's critical section.

use tokio::sync::mpsc;

use crate::message::ApplyMsg;

pub(crate) async fn run<C>(
    mut commits: mpsc::UnboundedReceiver<ApplyMsg<C>>,
    apply_tx: mpsc::Sender<ApplyMsg<C>>,
) {
    while let Some(msg) = commits.recv().await {
        if apply_tx.send(msg).await.is_err() {
            // The upstream consumer is gone; nothing left to deliver to.
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogIndex;

    #[tokio::test]
    async fn forwards_in_order() {
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let (apply_tx, mut apply_rx) = mpsc::channel(4);
        tokio::spawn(run(commit_rx, apply_tx));

        for i in 1..=3u64 {
            commit_tx
                .send(ApplyMsg::command(LogIndex::from(i), format!("c{i}")))
                .expect("pipeline alive");
        }

        for i in 1..=3u64 {
            let msg = apply_rx.recv().await.expect("message");
            assert_eq!(msg.index, LogIndex::from(i));
            assert_eq!(msg.command, format!("c{i}"));
        }
    }

    #[tokio::test]
    async fn bursts_are_absorbed_while_consumer_stalls() {
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        // Tiny upstream buffer: the pipeline must hold the burst instead of
        // the producer.
        let (apply_tx, mut apply_rx) = mpsc::channel(1);
        tokio::spawn(run(commit_rx, apply_tx));

        for i in 1..=100u64 {
            commit_tx
                .send(ApplyMsg::command(LogIndex::from(i), i))
                .expect("send never blocks");
        }

        for i in 1..=100u64 {
            assert_eq!(apply_rx.recv().await.expect("message").index, LogIndex::from(i));
        }
    }
}
