//! Client driver against an in-process service

use mope::client::{AesScheme, Alphabet, Ff1Scheme, Key, NavigationDriver};
use mope::core::{Opc, TreeConfig};
use mope::server::{max_imbalance, IndexService, Loopback, MemoryStore, RedbStore};
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn key() -> Key {
    Key::from_bytes(&[0x42; 16]).unwrap()
}

#[tokio::test]
async fn test_small_tree_scenario() {
    let mut service = IndexService::open(MemoryStore::new(), TreeConfig::default()).unwrap();
    {
        let mut driver = NavigationDriver::new(Loopback::new(&mut service), AesScheme::new(&key()));
        for value in ["5", "3", "8", "1"] {
            driver.insert(value).await.unwrap();
        }

        let all = driver.range_query(None, None).await.unwrap();
        let plaintexts: Vec<&str> = all.iter().map(|r| r.plaintext.as_str()).collect();
        assert_eq!(plaintexts, ["1", "3", "5", "8"]);

        let root = driver.query("5").await.unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].opc, Opc::ROOT);
    }
    service.tree().verify().unwrap();
    assert_eq!(service.stats().rebuilds(), 0);
}

#[tokio::test]
async fn test_duplicates_do_not_move_nodes() {
    let mut service = IndexService::open(MemoryStore::new(), TreeConfig::default()).unwrap();
    let mut driver = NavigationDriver::new(Loopback::new(&mut service), AesScheme::new(&key()));
    for value in ["5", "3", "8", "1"] {
        driver.insert(value).await.unwrap();
    }
    let before = driver.find_node_path(&["1", "3", "5", "8"]).await.unwrap();

    let again = driver.insert("5").await.unwrap();
    assert!(again.duplicate);

    let after = driver.find_node_path(&["1", "3", "5", "8"]).await.unwrap();
    assert_eq!(before, after);

    let fives = driver.query("5").await.unwrap();
    assert_eq!(fives.len(), 2);
    assert_ne!(fives[0].id, fives[1].id);
    assert_eq!(fives[0].opc, fives[1].opc);
}

#[tokio::test]
async fn test_shuffled_workload_stays_balanced_and_ordered() {
    let threshold = 2;
    let mut service =
        IndexService::open(MemoryStore::new(), TreeConfig::with_balance_threshold(threshold).unwrap()).unwrap();
    let mut values: Vec<String> = (0..300).map(|i| format!("{:06}", i * 7919 % 1_000_000)).collect();
    values.shuffle(&mut rand::rngs::StdRng::seed_from_u64(5));

    let scheme = Ff1Scheme::new(&key(), Alphabet::digits(), b"e2e".to_vec()).unwrap();
    {
        let mut driver = NavigationDriver::new(Loopback::new(&mut service), scheme);
        for value in &values {
            driver.insert(value).await.unwrap();
        }

        let all = driver.range_query(None, None).await.unwrap();
        let mut expected = values.clone();
        expected.sort();
        let got: Vec<String> = all.into_iter().map(|r| r.plaintext).collect();
        assert_eq!(got, expected);

        let window = driver.range_query(Some("100000"), Some("200000")).await.unwrap();
        let expected: Vec<&String> = expected
            .iter()
            .filter(|v| v.as_str() >= "100000" && v.as_str() <= "200000")
            .collect();
        assert_eq!(window.len(), expected.len());
        assert!(window.iter().zip(expected).all(|(r, v)| &r.plaintext == v));
    }

    service.tree().verify().unwrap();
    assert!(max_imbalance(service.tree()) <= threshold);
}

#[tokio::test]
async fn test_restart_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("index.redb");
    let values: Vec<String> = (0..80).rev().map(|i| format!("v{i:03}")).collect();

    {
        let store = RedbStore::open(&db).unwrap();
        let mut service = IndexService::open(store, TreeConfig::with_balance_threshold(1).unwrap()).unwrap();
        let mut driver = NavigationDriver::new(Loopback::new(&mut service), AesScheme::new(&key()));
        for value in &values {
            driver.insert(value).await.unwrap();
        }
    }

    let store = RedbStore::open(&db).unwrap();
    let mut service = IndexService::open(store, TreeConfig::with_balance_threshold(1).unwrap()).unwrap();
    assert_eq!(service.tree().len(), values.len());
    service.tree().verify().unwrap();

    let mut driver = NavigationDriver::new(Loopback::new(&mut service), AesScheme::new(&key()));
    driver.insert("v040").await.unwrap();
    let hits = driver.range_query(Some("v038"), Some("v041")).await.unwrap();
    let plaintexts: Vec<&str> = hits.iter().map(|r| r.plaintext.as_str()).collect();
    assert_eq!(plaintexts, ["v038", "v039", "v040", "v040", "v041"]);
}
