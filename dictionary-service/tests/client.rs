use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use dictionary_service::{
    client::{DictionaryClient, Query, SearchOutcome},
    error::StoreError,
    server::{Server, ServerHandle},
    store::{LookupStore, MemoryStore},
    word::Word,
};
use tokio::{
    task::JoinHandle,
    time::{sleep, timeout},
};

const WAIT: Duration = Duration::from_secs(3);

async fn start_on(
    addr: SocketAddr,
    words: Vec<Word>,
) -> Result<(SocketAddr, ServerHandle, JoinHandle<()>)> {
    start_with_store(addr, Arc::new(MemoryStore::from_words(words))).await
}

async fn start_with_store(
    addr: SocketAddr,
    store: Arc<dyn LookupStore>,
) -> Result<(SocketAddr, ServerHandle, JoinHandle<()>)> {
    let server = Server::bind(addr, store).await?;
    let addr = server.local_addr()?;
    let handle = server.handle();
    let task = tokio::spawn(async move {
        let _ = server.run_until(std::future::pending()).await;
    });
    Ok((addr, handle, task))
}

fn numbered_words(count: usize) -> Vec<Word> {
    (0..count)
        .map(|i| Word::new(format!("word{i}"), "noun", format!("từ {i}")))
        .collect()
}

#[tokio::test]
async fn operations_report_outcomes_as_values() -> Result<()> {
    let (addr, handle, server) = start_on("127.0.0.1:0".parse()?, Vec::new()).await?;
    let client = DictionaryClient::connect(addr).await?;

    let run = Word::new("run", "verb", "chạy")
        .with_phonetic("rʌn")
        .with_definition("to move fast")
        .with_example("He runs daily.");

    assert_eq!(client.add(&run).await, "Added run (verb)");
    assert_eq!(client.add(&run).await, "Error: Word already exists: run (verb)");
    assert_eq!(client.search("RUN").await, vec![run.clone()]);
    assert!(client.search("walk").await.is_empty());
    assert_eq!(
        client.lookup(Query::Exact("walk".into())).await?,
        SearchOutcome::NotFound("walk".into())
    );

    let faster = Word::new("run", "verb", "chạy nhanh");
    assert_eq!(client.update(&faster).await, "Updated run (verb)");
    assert_eq!(client.search_vietnamese("chạy nhanh").await, vec![faster]);

    assert_eq!(
        client.delete("run", "noun").await,
        "Error: Word not found: run (noun)"
    );
    assert_eq!(client.delete("run", "verb").await, "Deleted run (verb)");
    assert!(client.get_all().await.is_empty());

    client.disconnect().await;
    handle.stop().await;
    server.await?;
    Ok(())
}

#[tokio::test]
async fn concurrent_callers_get_their_own_replies() -> Result<()> {
    let (addr, handle, server) = start_on("127.0.0.1:0".parse()?, numbered_words(32)).await?;
    let client = Arc::new(DictionaryClient::connect(addr).await?);

    let mut tasks = Vec::new();
    for i in 0..32 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let alive = client.is_connected().await;
            let words = client.search(&format!("word{i}")).await;
            (i, alive, words)
        }));
    }

    for task in tasks {
        let (i, alive, words) = task.await?;
        assert!(alive, "probe {i} failed");
        assert_eq!(words.len(), 1, "caller {i} got {words:?}");
        assert_eq!(words[0].english, format!("word{i}"));
        assert_eq!(words[0].vietnamese_meaning, format!("từ {i}"));
    }

    handle.stop().await;
    server.await?;
    Ok(())
}

#[tokio::test]
async fn reconnect_recovers_after_server_restart() -> Result<()> {
    let (addr, handle, server) = start_on("127.0.0.1:0".parse()?, numbered_words(1)).await?;
    let client = DictionaryClient::connect(addr).await?;
    assert!(client.is_connected().await);

    handle.stop().await;
    server.await?;

    assert!(client.search("word0").await.is_empty());
    assert!(!client.is_connected().await);
    assert!(client.add(&Word::new("cat", "noun", "con mèo")).await.starts_with("Connection error:"));
    assert!(!client.reconnect().await);

    let (_, handle, server) = start_on(addr, numbered_words(1)).await?;
    assert!(client.reconnect().await);
    assert!(client.reconnect().await);
    assert!(client.is_connected().await);
    assert_eq!(client.search("word0").await.len(), 1);

    handle.stop().await;
    server.await?;
    Ok(())
}

/// Delays exact lookups of "slow" so a caller can give up mid round trip.
struct SlowStore {
    inner: MemoryStore,
}

#[async_trait]
impl LookupStore for SlowStore {
    async fn find_exact(&self, english: &str) -> Result<Vec<Word>, StoreError> {
        if english == "slow" {
            sleep(Duration::from_millis(300)).await;
        }
        self.inner.find_exact(english).await
    }
    async fn find_containing(&self, fragment: &str) -> Result<Vec<Word>, StoreError> {
        self.inner.find_containing(fragment).await
    }
    async fn find_vietnamese_exact(&self, meaning: &str) -> Result<Vec<Word>, StoreError> {
        self.inner.find_vietnamese_exact(meaning).await
    }
    async fn find_vietnamese_containing(&self, fragment: &str) -> Result<Vec<Word>, StoreError> {
        self.inner.find_vietnamese_containing(fragment).await
    }
    async fn insert(&self, word: Word) -> Result<bool, StoreError> {
        self.inner.insert(word).await
    }
    async fn update(&self, word: Word) -> Result<bool, StoreError> {
        self.inner.update(word).await
    }
    async fn delete_one(&self, english: &str, part_of_speech: &str) -> Result<bool, StoreError> {
        self.inner.delete_one(english, part_of_speech).await
    }
    async fn delete_all(&self, english: &str) -> Result<bool, StoreError> {
        self.inner.delete_all(english).await
    }
    async fn list_all(&self) -> Result<Vec<Word>, StoreError> {
        self.inner.list_all().await
    }
}

#[tokio::test]
async fn cancelled_lookup_does_not_leak_its_reply() -> Result<()> {
    let store = SlowStore {
        inner: MemoryStore::from_words([
            Word::new("slow", "adjective", "chậm"),
            Word::new("cat", "noun", "con mèo"),
        ]),
    };
    let (addr, handle, server) = start_with_store("127.0.0.1:0".parse()?, Arc::new(store)).await?;
    let client = DictionaryClient::connect(addr).await?;

    assert!(
        timeout(Duration::from_millis(50), client.search("slow"))
            .await
            .is_err()
    );

    let words = client.search("cat").await;
    assert_eq!(words.len(), 1, "got {words:?}");
    assert_eq!(words[0].english, "cat");

    // The abandoned reply must not surface later either.
    sleep(Duration::from_millis(400)).await;
    assert!(client.is_connected().await);
    assert_eq!(client.search_vietnamese("chậm").await[0].english, "slow");

    handle.stop().await;
    server.await?;
    Ok(())
}

#[tokio::test]
async fn connection_monitor_tracks_server_while_traffic_flows() -> Result<()> {
    let (addr, handle, server) = start_on("127.0.0.1:0".parse()?, numbered_words(16)).await?;
    let client = Arc::new(DictionaryClient::connect(addr).await?);
    let mut status = client.watch_connection(Duration::from_millis(10));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..5 {
                seen.extend(client.search(&format!("word{i}")).await);
                sleep(Duration::from_millis(3)).await;
            }
            (i, seen)
        }));
    }
    for task in tasks {
        let (i, seen) = task.await?;
        assert_eq!(seen.len(), 5, "caller {i} got {seen:?}");
        assert!(seen.iter().all(|word| word.english == format!("word{i}")));
    }
    assert!(*status.borrow());

    handle.stop().await;
    server.await?;
    timeout(WAIT, status.wait_for(|alive| !*alive)).await??;

    let (_, handle, server) = start_on(addr, numbered_words(1)).await?;
    assert!(client.reconnect().await);
    timeout(WAIT, status.wait_for(|alive| *alive)).await??;
    assert_eq!(client.search("word0").await.len(), 1);

    handle.stop().await;
    server.await?;
    Ok(())
}
