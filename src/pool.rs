//! 데이터그램 버퍼 풀
//!
//! 수신/송신 경로가 데이터그램마다 새로 할당하지 않도록 고정 크기
//! 버퍼를 재사용한다. 읽기 경로는 페이로드를 준비 버퍼로 복사한 뒤
//! 소유 버퍼를 풀에 반환한다.

use bytes::BytesMut;
use parking_lot::Mutex;

/// 고정 크기 데이터그램 버퍼의 재사용 풀
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    entry_size: usize,
    capacity: usize,
}

impl BufferPool {
    /// `capacity`개까지 `entry_size` 바이트 버퍼를 보관하는 풀 생성
    pub fn new(entry_size: usize, capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            entry_size,
            capacity,
        }
    }

    /// 버퍼 하나 대여 (풀이 비어 있으면 새로 할당)
    ///
    /// 반환되는 버퍼의 길이는 `entry_size`로 맞춰져 있어 바로
    /// `recv_from`에 넘길 수 있다.
    pub fn get(&self) -> BytesMut {
        let mut buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.entry_size));
        buf.resize(self.entry_size, 0);
        buf
    }

    /// 버퍼 반환 (풀이 가득 차 있으면 그대로 버린다)
    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    /// 현재 보관 중인 버퍼 수
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_recycles() {
        let pool = BufferPool::new(64, 2);
        let a = pool.get();
        assert_eq!(a.len(), 64);
        pool.put(a);
        assert_eq!(pool.available(), 1);

        let b = pool.get();
        assert_eq!(b.len(), 64);
        assert_eq!(pool.available(), 0);
        pool.put(b);
    }

    #[test]
    fn test_capacity_bound() {
        let pool = BufferPool::new(16, 1);
        let a = pool.get();
        let b = pool.get();
        pool.put(a);
        pool.put(b); // 용량 초과분은 버려진다
        assert_eq!(pool.available(), 1);
    }
}
