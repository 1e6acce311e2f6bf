mod common;

use std::collections::HashSet;
use std::error::Error;
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::TimeDelta;
use lifecycle_core::{Clock, JobKey, QueueEntry, QueueStats};

use db::QueueError;
use db::repositories::WorkQueue;

fn key(job: &str) -> Result<JobKey, Box<dyn Error>> {
    Ok(JobKey::parse("acme", job)?)
}

#[test]
fn enqueue_is_idempotent() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;

    assert!(queue.enqueue(&key("job_1")?)?);
    assert!(!queue.enqueue(&key("job_1")?)?);
    assert_eq!(
        common::names_in(&env.config.storage.queued_dir())?,
        vec!["acme~job_1.json".to_string()]
    );

    let claim = queue.claim("w1")?.ok_or("expected a claim")?;
    assert!(!queue.enqueue(&claim.key())?);
    assert_eq!(
        queue.stats()?,
        QueueStats {
            queued: 0,
            claimed: 1,
            expired: 0
        }
    );
    Ok(())
}

#[test]
fn tenants_do_not_collide() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;

    assert!(queue.enqueue(&JobKey::parse("acme", "job_1")?)?);
    assert!(queue.enqueue(&JobKey::parse("globex", "job_1")?)?);
    assert_eq!(queue.stats()?.queued, 2);
    Ok(())
}

#[test]
fn single_entry_scenario() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;

    queue.enqueue(&key("job_42")?)?;

    let claim = queue.claim("w1")?.ok_or("w1 should get job_42")?;
    assert_eq!(claim.job_id.as_str(), "job_42");
    assert_eq!(claim.worker_id, "w1");
    assert_eq!(claim.claimed_at, common::epoch());
    assert_eq!(claim.lease_expires_at, common::epoch() + TimeDelta::seconds(30));
    assert_eq!(claim.enqueued_at, common::epoch());

    assert!(queue.claim("w2")?.is_none());

    queue.ack(&claim)?;
    assert!(queue.claim("w1")?.is_none());
    assert!(queue.claim("w2")?.is_none());
    assert_eq!(queue.stats()?, QueueStats::default());
    Ok(())
}

#[test]
fn concurrent_claims_have_exactly_one_winner() -> Result<(), Box<dyn Error>> {
    const WORKERS: usize = 8;

    let env = common::setup()?;
    env.queue()?.enqueue(&key("job_1")?)?;

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            // Independent instances over the same directories, like separate processes.
            let queue = env.queue().map_err(|e| e.to_string());
            let barrier = barrier.clone();
            thread::spawn(move || {
                let queue = queue?;
                barrier.wait();
                queue
                    .claim(&format!("w{i}"))
                    .map_err(|e| e.to_string())
            })
        })
        .collect();

    let mut claims = Vec::new();
    for handle in handles {
        let claimed = handle.join().map_err(|_| "claim thread panicked")??;
        claims.extend(claimed);
    }

    assert_eq!(claims.len(), 1);
    assert_eq!(
        common::names_in(&env.config.storage.claimed_dir())?.len(),
        1
    );
    assert!(common::names_in(&env.config.storage.queued_dir())?.is_empty());
    Ok(())
}

#[test]
fn concurrent_claims_over_many_entries_never_duplicate() -> Result<(), Box<dyn Error>> {
    const WORKERS: usize = 4;
    const JOBS: usize = 20;

    let env = common::setup()?;
    let queue = env.queue()?;
    for i in 0..JOBS {
        queue.enqueue(&key(&format!("job_{i:02}"))?)?;
    }

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let queue = env.queue().map_err(|e| e.to_string());
            let barrier = barrier.clone();
            thread::spawn(move || {
                let queue = queue?;
                barrier.wait();
                let mut taken = Vec::new();
                while let Some(claim) = queue.claim(&format!("w{i}")).map_err(|e| e.to_string())? {
                    taken.push(claim.job_id.to_string());
                }
                Ok::<_, String>(taken)
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().map_err(|_| "claim thread panicked")??);
    }

    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), JOBS);
    assert_eq!(unique.len(), JOBS);
    Ok(())
}

#[test]
fn expired_lease_is_reclaimed_by_another_worker() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;
    queue.enqueue(&key("job_1")?)?;

    let first = queue.claim("w1")?.ok_or("expected a claim")?;

    env.clock.advance(TimeDelta::seconds(29));
    assert!(queue.claim("w2")?.is_none());

    env.clock.advance(TimeDelta::seconds(1));
    assert_eq!(queue.stats()?.expired, 1);
    let second = queue.claim("w2")?.ok_or("expired lease should be reclaimable")?;

    assert_eq!(second.key(), first.key());
    assert_eq!(second.worker_id, "w2");
    assert_ne!(second.claim_id, first.claim_id);
    assert_eq!(second.enqueued_at, first.enqueued_at);
    assert_eq!(second.lease_expires_at, env.clock.now() + TimeDelta::seconds(30));
    assert_eq!(common::names_in(&env.config.storage.claimed_dir())?.len(), 1);

    // The superseded claim cannot clear the new holder's entry.
    queue.ack(&first)?;
    queue.release(&first)?;
    assert_eq!(
        queue.stats()?,
        QueueStats {
            queued: 0,
            claimed: 1,
            expired: 0
        }
    );

    queue.ack(&second)?;
    assert_eq!(queue.stats()?, QueueStats::default());
    Ok(())
}

#[test]
fn queued_entries_are_preferred_over_expired_leases() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;
    queue.enqueue(&key("job_a")?)?;
    queue.claim("w1")?.ok_or("expected a claim")?;
    env.clock.advance(TimeDelta::minutes(5));
    queue.enqueue(&key("job_b")?)?;

    let next = queue.claim("w2")?.ok_or("expected a claim")?;
    assert_eq!(next.job_id.as_str(), "job_b");
    let reclaimed = queue.claim("w3")?.ok_or("expected a reclaim")?;
    assert_eq!(reclaimed.job_id.as_str(), "job_a");
    Ok(())
}

#[test]
fn release_returns_entry_to_queue() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;
    queue.enqueue(&key("job_1")?)?;

    let claim = queue.claim("w1")?.ok_or("expected a claim")?;
    queue.release(&claim)?;
    assert_eq!(queue.stats()?.queued, 1);

    let again = queue.claim("w2")?.ok_or("released entry should be claimable")?;
    assert_eq!(again.worker_id, "w2");
    assert_eq!(again.enqueued_at, claim.enqueued_at);

    // Releasing twice is harmless.
    queue.release(&claim)?;
    assert_eq!(
        queue.stats()?,
        QueueStats {
            queued: 0,
            claimed: 1,
            expired: 0
        }
    );
    Ok(())
}

#[test]
fn release_discards_claim_when_already_requeued() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;
    queue.enqueue(&key("job_1")?)?;
    let claim = queue.claim("w1")?.ok_or("expected a claim")?;

    // Simulate an independent re-enqueue that raced with the claim.
    std::fs::write(
        env.config.storage.queued_dir().join("acme~job_1.json"),
        serde_json::to_vec(&lifecycle_core::QueueEntry::new(claim.key(), env.clock.now()))?,
    )?;

    queue.release(&claim)?;
    assert_eq!(
        queue.stats()?,
        QueueStats {
            queued: 1,
            claimed: 0,
            expired: 0
        }
    );
    Ok(())
}

#[test]
fn ack_is_idempotent() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;
    queue.enqueue(&key("job_1")?)?;
    let claim = queue.claim("w1")?.ok_or("expected a claim")?;

    queue.ack(&claim)?;
    queue.ack(&claim)?;
    assert_eq!(queue.stats()?, QueueStats::default());
    Ok(())
}

#[test]
fn claims_never_rewrite_the_entry() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let writer = Arc::new(common::CountingWriter::default());
    let queue = env.queue()?.with_writer(writer.clone());
    queue.enqueue(&key("job_1")?)?;
    assert_eq!(writer.calls(), 1);

    queue.claim("w1")?.ok_or("expected a claim")?;
    env.clock.advance(TimeDelta::seconds(30));
    let second = queue.claim("w2")?.ok_or("expired lease should be reclaimable")?;
    assert_eq!(writer.calls(), 1);

    let claimed = common::names_in(&env.config.storage.claimed_dir())?;
    assert_eq!(claimed.len(), 1);
    assert!(claimed[0].starts_with(&format!("acme~job_1~{}~w2~", second.claim_id)));

    let bytes = std::fs::read(env.config.storage.claimed_dir().join(&claimed[0]))?;
    let entry: QueueEntry = serde_json::from_slice(&bytes)?;
    assert_eq!(entry.enqueued_at, common::epoch());
    assert!(common::temp_files(env.root())?.is_empty());
    Ok(())
}

#[test]
fn unreadable_entry_stays_queued() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;
    // A directory under an entry's name cannot be read as one.
    std::fs::create_dir(env.config.storage.queued_dir().join("acme~job_1.json"))?;

    let result = queue.claim("w1");
    assert!(matches!(result, Err(QueueError::Io(_))));
    assert_eq!(
        common::names_in(&env.config.storage.queued_dir())?,
        vec!["acme~job_1.json".to_string()]
    );
    assert!(common::names_in(&env.config.storage.claimed_dir())?.is_empty());
    Ok(())
}

#[test]
fn invalid_worker_id_is_rejected() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;
    queue.enqueue(&key("job_1")?)?;

    assert!(matches!(queue.claim("w~1"), Err(QueueError::InvalidId(_))));
    assert_eq!(queue.stats()?.queued, 1);
    Ok(())
}

#[test]
fn failed_enqueue_leaves_nothing_behind() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let writer = Arc::new(common::FailingWriter::armed());
    let queue = env.queue()?.with_writer(writer.clone());

    assert!(matches!(queue.enqueue(&key("job_1")?), Err(QueueError::Io(_))));
    assert!(common::names_in(&env.config.storage.queued_dir())?.is_empty());
    assert!(common::temp_files(env.root())?.is_empty());

    writer.disarm();
    assert!(queue.enqueue(&key("job_1")?)?);
    assert_eq!(queue.stats()?.queued, 1);
    Ok(())
}

#[test]
fn concurrent_enqueues_racing_a_claim_keep_one_entry() -> Result<(), Box<dyn Error>> {
    const ENQUEUERS: usize = 6;
    const ROUNDS: usize = 30;

    for _ in 0..ROUNDS {
        let env = common::setup()?;
        let job = key("job_1")?;
        let barrier = Arc::new(Barrier::new(ENQUEUERS + 1));

        let enqueuers: Vec<_> = (0..ENQUEUERS)
            .map(|_| {
                let queue = env.queue().map_err(|e| e.to_string());
                let (job, barrier) = (job.clone(), barrier.clone());
                thread::spawn(move || {
                    let queue = queue?;
                    barrier.wait();
                    queue.enqueue(&job).map_err(|e| e.to_string())
                })
            })
            .collect();

        let claimer = {
            let queue = env.queue().map_err(|e| e.to_string());
            let barrier = barrier.clone();
            thread::spawn(move || {
                let queue = queue?;
                barrier.wait();
                let mut claims = 0;
                for _ in 0..50 {
                    if queue.claim("w1").map_err(|e| e.to_string())?.is_some() {
                        claims += 1;
                    }
                }
                Ok::<_, String>(claims)
            })
        };

        let mut written = 0;
        for handle in enqueuers {
            if handle.join().map_err(|_| "enqueue thread panicked")?? {
                written += 1;
            }
        }
        let claims = claimer.join().map_err(|_| "claim thread panicked")??;

        let stats = env.queue()?.stats()?;
        assert_eq!(written, 1);
        assert!(claims <= 1);
        assert_eq!(stats.queued + stats.claimed, 1);
    }
    Ok(())
}

#[test]
fn stray_files_are_ignored() -> Result<(), Box<dyn Error>> {
    let env = common::setup()?;
    let queue = env.queue()?;
    let queued = env.config.storage.queued_dir();
    std::fs::write(queued.join(".tmp-abc"), b"partial")?;
    std::fs::write(queued.join("README.txt"), b"hello")?;
    std::fs::write(queued.join("bad name.json"), b"{}")?;
    std::fs::write(env.config.storage.claimed_dir().join("oops.json"), b"{}")?;

    assert!(queue.claim("w1")?.is_none());
    assert_eq!(queue.stats()?.expired, 0);
    Ok(())
}
