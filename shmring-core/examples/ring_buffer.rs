//! Example of using the shared memory ring buffer.
//!
//! A producer thread and a consumer thread each open their own handles to the
//! same named ring and doorbell, the way separate processes would.

use shmring_core::doorbell::{Doorbell, Mode, Wakeup};
use shmring_core::ring::{Record, RingBuffer, SegmentOptions};
use std::thread;
use std::time::Duration;

const MESSAGES: u64 = 12;

fn main() -> anyhow::Result<()> {
    let pid = std::process::id();
    let ring_name = format!("/shmring-example-{}", pid);
    let bell_name = format!("/shmring-example-{}-bell", pid);
    let options = SegmentOptions::new(ring_name.clone(), 4);

    // The main thread holds the creator handles so the names outlive both threads.
    let ring = RingBuffer::open(options.clone())?;
    let _doorbell = Doorbell::open(&bell_name)?;
    println!("Created ring {} with {} records", ring.name(), ring.capacity());

    let producer_options = options.clone();
    let producer_bell = bell_name.clone();
    let producer_thread = thread::spawn(move || -> anyhow::Result<()> {
        let ring = RingBuffer::open(producer_options)?;
        let doorbell = Doorbell::open(&producer_bell)?;

        for seq in 0..MESSAGES {
            let record = Record::new(pid as libc::pid_t, seq, &format!("Message {}", seq));
            if let Some(old) = ring.insert(&record)? {
                println!("Producer: ring full, overwrote #{}", old.sequence);
            }
            doorbell.notify(Mode::NonBlocking)?;

            // Bursts of three outrun the consumer and force overwrites
            if seq % 3 == 2 {
                thread::sleep(Duration::from_millis(200));
            }
        }

        println!("Producer: Done writing");
        Ok(())
    });

    let consumer_thread = thread::spawn(move || -> anyhow::Result<()> {
        let ring = RingBuffer::open(options)?;
        let doorbell = Doorbell::open(&bell_name)?;

        let mut last = None;
        while last != Some(MESSAGES - 1) {
            match doorbell.wait_timeout(Duration::from_millis(500))? {
                Wakeup::Notified => {}
                _ => println!("Consumer: No wake-up, checking anyway"),
            }
            for record in ring.drain()? {
                println!("Consumer: Read #{}: {}", record.sequence, record.payload_text());
                last = Some(record.sequence);
            }
            thread::sleep(Duration::from_millis(150));
        }

        println!("Consumer: Done reading");
        Ok(())
    });

    producer_thread
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;
    consumer_thread
        .join()
        .map_err(|_| anyhow::anyhow!("consumer thread panicked"))??;

    println!("Example completed successfully!");
    Ok(())
}
