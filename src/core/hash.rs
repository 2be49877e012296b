//! 文件内容哈希：MD5 作为去重主键，SHA-1 用于云端校验头

use md5::Md5;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// 流式读取的块大小
pub const HASH_BLOCK_SIZE: usize = 8192;

/// 哈希算法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// 去重主键
    Md5,
    /// 云端完整性校验
    Sha1,
}

/// 以固定块大小流式计算哈希，返回小写十六进制
pub fn hash_reader<R: Read>(mut reader: R, algorithm: HashAlgorithm) -> io::Result<String> {
    match algorithm {
        HashAlgorithm::Md5 => digest_reader::<Md5, _>(&mut reader),
        HashAlgorithm::Sha1 => digest_reader::<Sha1, _>(&mut reader),
    }
}

fn digest_reader<D: Digest, R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = [0u8; HASH_BLOCK_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// 计算文件哈希（阻塞）
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let file = File::open(path)?;
    hash_reader(file, algorithm)
}

/// 在阻塞线程池中计算文件哈希，避免阻塞 async runtime
pub async fn hash_file_async(path: PathBuf, algorithm: HashAlgorithm) -> io::Result<String> {
    tokio::task::spawn_blocking(move || hash_file(&path, algorithm))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_known_digests() {
        let md5 = hash_reader(&b"hello world"[..], HashAlgorithm::Md5).unwrap();
        assert_eq!(md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");

        let sha1 = hash_reader(&b"hello world"[..], HashAlgorithm::Sha1).unwrap();
        assert_eq!(sha1, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[test]
    fn test_empty_input() {
        let md5 = hash_reader(&b""[..], HashAlgorithm::Md5).unwrap();
        assert_eq!(md5, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_same_content_different_path() {
        let dir = tempfile::tempdir().unwrap();
        // 跨越多个块
        let data: Vec<u8> = (0..HASH_BLOCK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();

        let a = dir.path().join("a.jpg");
        let b = dir.path().join("nested_b.png");
        File::create(&a).unwrap().write_all(&data).unwrap();
        File::create(&b).unwrap().write_all(&data).unwrap();

        let ha = hash_file(&a, HashAlgorithm::Md5).unwrap();
        let hb = hash_file(&b, HashAlgorithm::Md5).unwrap();
        assert_eq!(ha, hb);
        assert_eq!(ha, hash_reader(&data[..], HashAlgorithm::Md5).unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = hash_file_async(dir.path().join("gone.jpg"), HashAlgorithm::Md5).await;
        assert!(result.is_err());
    }
}
