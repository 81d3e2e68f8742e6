//! Bigfile 集成测试
//!
//! 覆盖完整的分块写入、读取、版本保留、去重与垃圾回收流程

use silent_bigfile::{
    BigfileConfig, BigfileStorage, CATALOG_KEY, Catalog, Compression, ContentStore, MemoryStore,
    SledStore, StorageError, chunk_key,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// 创建测试用的 BigfileStorage（内存后端）
fn create_test_storage(chunk_size: usize, retention: usize) -> (BigfileStorage, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = BigfileConfig {
        chunk_size,
        retention,
        lock_ttl_secs: 10,
    };
    (BigfileStorage::new(store.clone(), config), store)
}

/// 生成有周期结构的测试数据，便于跨块边界验证
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_round_trip() {
    let (storage, _store) = create_test_storage(1000, 3);

    // 2.5 个块的数据
    let data = pattern(2500);
    let item = storage.save("docs/report", &data).await.expect("保存失败");
    assert_eq!(item.total_size, 2500);
    assert_eq!(item.chunks.len(), 3);

    let read_back = storage.read("docs/report").await.expect("读取失败");
    assert_eq!(read_back, data, "读取的数据与原始数据不一致");
    println!("✅ 往返读写测试通过");
}

#[tokio::test]
async fn test_streaming_write_and_read() {
    let (storage, _store) = create_test_storage(1000, 3);
    let data = pattern(3700);

    // 以不对齐的片段流式写入，跨越多个块边界
    let mut writer = storage.open_writer("stream");
    for piece in data.chunks(333) {
        writer.write(piece).await.expect("写入失败");
    }
    let item = writer.close().await.expect("关闭写入失败");
    assert_eq!(item.chunks.len(), 4); // 3 个整块 + 1 个尾块
    assert_eq!(item.chunks[3].size, 700);

    // 以小缓冲流式读出
    let mut reader = storage.open_reader("stream");
    let mut out = Vec::new();
    let mut buf = [0u8; 170];
    loop {
        let n = reader.read(&mut buf).await.expect("读取失败");
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    reader.close().expect("完整性校验失败");
    assert_eq!(out, data);
    println!("✅ 流式读写测试通过");
}

#[tokio::test]
async fn test_chunk_determinism() {
    let (storage, _store) = create_test_storage(1000, 3);
    let data = pattern(2500);

    let first = storage.save("a", &data).await.unwrap();
    let second = storage.save("a", &data).await.unwrap();

    assert_eq!(first.chunks.len(), second.chunks.len());
    for (c1, c2) in first.chunks.iter().zip(second.chunks.iter()) {
        assert_eq!(c1.checksum, c2.checksum, "内容寻址必须确定");
        assert_eq!(c1.size, c2.size);
    }
    assert_eq!(first.checksum, second.checksum);
    println!("✅ 分块确定性测试通过");
}

#[tokio::test]
async fn test_version_monotonicity() {
    let (storage, _store) = create_test_storage(1000, 10);

    for expected in 0..4u64 {
        let item = storage
            .save("versioned", format!("内容 {expected}").as_bytes())
            .await
            .unwrap();
        assert_eq!(item.version, expected);
    }

    let catalog = storage.load_catalog().await.unwrap();
    let latest = catalog.find_item("versioned").unwrap();
    assert_eq!(latest.version, 3);
    println!("✅ 版本单调性测试通过");
}

#[tokio::test]
async fn test_retention_bound() {
    let (storage, _store) = create_test_storage(1000, 3);

    // 发布 K+2 = 5 个版本
    for i in 0..5 {
        storage
            .save("bounded", format!("版本 {i}").as_bytes())
            .await
            .unwrap();
    }

    let catalog = storage.load_catalog().await.unwrap();
    let history = catalog.history("bounded");
    assert_eq!(history.len(), 3, "目录只保留最近 K 个版本");
    let versions: Vec<u64> = history.iter().map(|i| i.version).collect();
    assert_eq!(versions, vec![2, 3, 4]);
    println!("✅ 保留上限测试通过");
}

#[tokio::test]
async fn test_deduplication() {
    let (storage, store) = create_test_storage(1000, 3);
    let data = pattern(2500);

    let first = storage.save("dedup/a", &data).await.unwrap();
    let second = storage.save("dedup/b", &data).await.unwrap();

    // 两个路径引用同一组块校验和
    let sums1: Vec<&str> = first.chunks.iter().map(|c| c.checksum.as_str()).collect();
    let sums2: Vec<&str> = second.chunks.iter().map(|c| c.checksum.as_str()).collect();
    assert_eq!(sums1, sums2);

    // 存储中每个块只存在一份
    let chunk_keys: Vec<String> = store
        .keys()
        .await
        .into_iter()
        .filter(|k| k.starts_with("bigfile-chunk-"))
        .collect();
    assert_eq!(chunk_keys.len(), first.chunks.len());
    println!("✅ 去重测试通过");
}

#[tokio::test]
async fn test_garbage_collection_after_retention_trim() {
    // 块大小 4，保留 1 个版本
    let (storage, store) = create_test_storage(4, 1);

    // v0: 块 {x, y}
    let v0 = storage.save("gc", b"aaaabbbb").await.unwrap();
    let (x, y) = (v0.chunks[0].checksum.clone(), v0.chunks[1].checksum.clone());

    // v1: 块 {y, z}，发布后 v0 被裁剪，其独占块 x 应被回收
    let v1 = storage.save("gc", b"bbbbcccc").await.unwrap();
    let z = v1.chunks[1].checksum.clone();
    assert_eq!(v1.chunks[0].checksum, y, "共享块校验和一致");

    assert!(!store.contains(&chunk_key(&x)).await, "孤块 x 应被删除");
    assert!(store.contains(&chunk_key(&y)).await, "共享块 y 应保留");
    assert!(store.contains(&chunk_key(&z)).await, "新块 z 应保留");
    println!("✅ 垃圾回收测试通过");
}

#[tokio::test]
async fn test_not_found() {
    let (storage, _store) = create_test_storage(1000, 3);

    // 目录尚不存在
    assert!(matches!(
        storage.read("missing").await,
        Err(StorageError::PathNotFound(_))
    ));

    // 目录存在但路径未发布
    storage.save("present", b"data").await.unwrap();
    assert!(matches!(
        storage.read("missing").await,
        Err(StorageError::PathNotFound(_))
    ));

    // 空目录上的独立垃圾回收无事可做
    let (empty_storage, _) = create_test_storage(1000, 3);
    assert_eq!(empty_storage.garbage_collect().await.unwrap(), 0);
    println!("✅ 未找到路径测试通过");
}

#[tokio::test]
async fn test_boundary_chunking() {
    let (storage, _store) = create_test_storage(1000, 3);

    // 恰好一个块大小的数据：一个整块，关闭时没有多余的空尾块
    let data = pattern(1000);
    let item = storage.save("boundary", &data).await.unwrap();
    assert_eq!(item.chunks.len(), 1);
    assert_eq!(item.chunks[0].size, 1000);
    assert_eq!(item.total_size, 1000);

    let read_back = storage.read("boundary").await.unwrap();
    assert_eq!(read_back, data);
    println!("✅ 边界分块测试通过");
}

#[tokio::test]
async fn test_empty_object() {
    let (storage, _store) = create_test_storage(1000, 3);

    // 空对象：没有任何块，但仍有版本与对象校验和
    let item = storage.save("empty", b"").await.unwrap();
    assert!(item.chunks.is_empty());
    assert_eq!(item.total_size, 0);

    let read_back = storage.read("empty").await.unwrap();
    assert!(read_back.is_empty());
    println!("✅ 空对象测试通过");
}

#[tokio::test]
async fn test_corrupted_chunk_fails_integrity_check() {
    let (storage, store) = create_test_storage(1000, 3);
    let data = pattern(2500);
    let item = storage.save("corrupt", &data).await.unwrap();

    // 越过写入管线直接篡改第一个块的负载
    store
        .upsert(&chunk_key(&item.chunks[0].checksum), "损坏的数据".as_bytes())
        .await
        .unwrap();

    // 读取本身不报错，关闭时的对象摘要校验必须失败
    let mut reader = storage.open_reader("corrupt");
    reader.read_to_end().await.expect("读取失败");
    assert!(matches!(
        reader.close(),
        Err(StorageError::ChecksumMismatch { .. })
    ));
    println!("✅ 损坏块完整性校验测试通过");
}

#[tokio::test]
async fn test_unsupported_compression_is_rejected() {
    let (storage, store) = create_test_storage(1000, 3);
    storage.save("compressed", &pattern(100)).await.unwrap();

    // 把持久化目录中该条目的压缩模式改写为 zlib
    let doc = store.get(CATALOG_KEY).await.unwrap();
    let mut catalog = Catalog::from_bytes(&doc).unwrap();
    catalog.items[0].compression = Compression::Zlib;
    store
        .upsert(CATALOG_KEY, &catalog.to_bytes().unwrap())
        .await
        .unwrap();

    assert!(matches!(
        storage.read("compressed").await,
        Err(StorageError::UnsupportedCompression(_))
    ));
    println!("✅ 不支持压缩模式测试通过");
}

#[tokio::test]
async fn test_publish_fails_while_catalog_is_locked() {
    let (storage, store) = create_test_storage(1000, 3);
    storage.save("locked", b"v0").await.unwrap();

    // 外部持有目录锁，期间的发布必须直接失败，不做内部重试
    let (_doc, _token) = store
        .lock_and_get(CATALOG_KEY, Duration::from_secs(30))
        .await
        .unwrap();

    let mut writer = storage.open_writer("locked");
    writer.write(b"v1").await.unwrap();
    assert!(matches!(
        writer.close().await,
        Err(StorageError::Store(_))
    ));
    println!("✅ 目录锁占用测试通过");
}

#[tokio::test]
async fn test_expired_lock_surfaces_cas_conflict() {
    // 锁 TTL 为 0：发布事务在 CAS 写回前锁已过期，令牌失效
    let store = Arc::new(MemoryStore::new());
    let config = BigfileConfig {
        chunk_size: 1000,
        retention: 3,
        lock_ttl_secs: 0,
    };
    let storage = BigfileStorage::new(store, config);

    assert!(matches!(
        storage.save("conflict", b"data").await,
        Err(StorageError::CasConflict(_))
    ));
    println!("✅ CAS 冲突上抛测试通过");
}

#[tokio::test]
async fn test_sled_backend_end_to_end() {
    let dir = TempDir::new().expect("创建临时目录失败");
    let store = Arc::new(SledStore::open(dir.path()).expect("打开 sled 后端失败"));
    let config = BigfileConfig {
        chunk_size: 1024,
        retention: 2,
        lock_ttl_secs: 10,
    };
    let storage = BigfileStorage::new(store, config);

    let data = pattern(5000);
    let item = storage.save("sled/object", &data).await.expect("保存失败");
    assert_eq!(item.chunks.len(), 5);

    let read_back = storage.read("sled/object").await.expect("读取失败");
    assert_eq!(read_back, data);

    // 覆盖三个版本，保留 2 个
    storage.save("sled/object", &pattern(100)).await.unwrap();
    storage.save("sled/object", &pattern(200)).await.unwrap();
    let catalog = storage.load_catalog().await.unwrap();
    assert_eq!(catalog.history("sled/object").len(), 2);
    println!("✅ sled 后端端到端测试通过");
}
