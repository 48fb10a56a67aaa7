#[cfg(test)]
mod tests {
    use crate::memory::block::{BlockHeap, BlockHeapConfig};
    use crate::memory::buddy::{BuddyConfig, BuddyHeap};
    use crate::memory::error::AllocError;
    use crate::memory::heap::{BaseHeap, HeapFlags};
    use crate::memory::scratch::ScratchHeap;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn test_integration_shared_heap_mix() {
        // X1: all three allocators carve regions from one heap and are used
        // interleaved; the heap balances once they are gone.
        let heap = BaseHeap::new(HeapFlags::COUNT);
        let mut blocks = BlockHeap::new(&heap, &BlockHeapConfig::new(32, 64)).unwrap();
        let mut scratch = ScratchHeap::new(&heap, 4096, 16).unwrap();
        let mut buddy = BuddyHeap::new(&heap, &BuddyConfig::new(14)).unwrap();
        // block region, scratch region, buddy bitset and data
        assert_eq!(heap.alloc_count(), 4);

        let mut block_ptrs = Vec::new();
        let mut buddy_ptrs = Vec::new();

        for i in 0u8..120 {
            match i % 3 {
                0 => {
                    if let Ok(p) = blocks.alloc() {
                        // Safety: Test code.
                        unsafe { p.as_ptr().write_bytes(i, 32) };
                        block_ptrs.push((p, i));
                    }
                }
                1 => {
                    let n = 16 + usize::from(i) * 3;
                    if let Ok(p) = buddy.alloc(n) {
                        // Safety: Test code.
                        unsafe { p.as_ptr().write_bytes(i, n) };
                        buddy_ptrs.push((p, i));
                    }
                }
                _ => {
                    let v = scratch.alloc_val(u64::from(i)).unwrap();
                    assert_eq!(*v, u64::from(i));
                }
            }
            if i % 30 == 0 {
                scratch.reset();
            }
        }

        // Nothing scribbled over anything else.
        for &(p, tag) in &block_ptrs {
            // Safety: Test code.
            assert_eq!(unsafe { *p.as_ptr() }, tag);
        }
        for &(p, tag) in &buddy_ptrs {
            // Safety: Test code.
            assert_eq!(unsafe { *p.as_ptr() }, tag);
        }

        for (p, _) in block_ptrs {
            blocks.free(p.as_ptr()).unwrap();
        }
        for (p, _) in buddy_ptrs.into_iter().rev() {
            // Safety: Test code.
            unsafe { buddy.free(p.as_ptr()).unwrap() };
        }
        assert_eq!(blocks.blocks_free(), 64);
        assert!(buddy.stats().is_fully_coalesced());

        blocks.term();
        scratch.term();
        buddy.term();
        assert_eq!(heap.alloc_count(), 0);
        assert!(heap.term());
    }

    #[test]
    fn test_integration_debug_heap_traces() {
        // X2: the DEBUG flag routes every event through tracing without
        // changing results.
        init_tracing();
        let heap = BaseHeap::new(HeapFlags::COUNT | HeapFlags::DEBUG | HeapFlags::CLEAR);

        let mut blocks = BlockHeap::new(&heap, &BlockHeapConfig::new(16, 2)).unwrap();
        let a = blocks.alloc().unwrap();
        let b = blocks.alloc().unwrap();
        assert_eq!(blocks.alloc(), Err(AllocError::Exhausted));
        blocks.free(b.as_ptr()).unwrap();
        blocks.free(a.as_ptr()).unwrap();

        let mut scratch = ScratchHeap::new(&heap, 64, 8).unwrap();
        assert_eq!(scratch.alloc(65, 1), Err(AllocError::Exhausted));

        let mut buddy = BuddyHeap::new(&heap, &BuddyConfig::new(10)).unwrap();
        let p = buddy.alloc(200).unwrap();
        // Safety: Test code.
        unsafe { buddy.free(p.as_ptr()).unwrap() };

        drop((blocks, scratch, buddy));
        assert!(heap.term());
    }

    #[test]
    fn test_integration_heap_outlives_failed_construction() {
        // X3: failed constructions leave nothing behind.
        let heap = BaseHeap::new(HeapFlags::COUNT);
        assert!(BlockHeap::new(&heap, &BlockHeapConfig::new(16, 256)).is_err());
        assert!(ScratchHeap::new(&heap, 0, 8).is_err());
        assert!(ScratchHeap::new(&heap, 64, 3).is_err());
        assert!(BuddyHeap::new(&heap, &BuddyConfig::new(40)).is_err());
        assert!(heap.term());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_integration_buddy_churn() {
        // X4: long alloc/free churn ends fully coalesced.
        let heap = BaseHeap::new(HeapFlags::COUNT);
        let mut buddy = BuddyHeap::new(&heap, &BuddyConfig::new(18)).unwrap();
        let mut live = Vec::new();
        let mut seed = 0x2545_F491u32;

        for _ in 0..5000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            if seed % 3 == 0 && !live.is_empty() {
                let idx = seed as usize % live.len();
                let p: std::ptr::NonNull<u8> = live.swap_remove(idx);
                // Safety: Test code.
                unsafe { buddy.free(p.as_ptr()).unwrap() };
            } else if let Ok(p) = buddy.alloc(1 + (seed as usize % 4000)) {
                live.push(p);
            }
        }
        for p in live {
            // Safety: Test code.
            unsafe { buddy.free(p.as_ptr()).unwrap() };
        }
        assert!(buddy.stats().is_fully_coalesced());
        assert_eq!(buddy.stats().free_bytes, buddy.capacity());
    }
}
