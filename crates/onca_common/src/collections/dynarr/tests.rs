use std::{
    alloc::Layout,
    cell::Cell,
    io::{self, Write},
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::Arc,
};

use once_cell::sync::Lazy;
use onca_logging::Logger;
use parking_lot::Mutex;
use proptest::prelude::*;

use crate::alloc::{AllocPolicy, composable::TrackingAllocator};
use super::*;

/// Value whose `clone` panics once its fuse runs out
#[derive(Debug)]
struct Bomb {
    value: i32,
    fuse:  Rc<Cell<usize>>,
}

impl Bomb {
    fn new(value: i32, fuse: &Rc<Cell<usize>>) -> Self {
        Self { value, fuse: fuse.clone() }
    }
}

impl Clone for Bomb {
    fn clone(&self) -> Self {
        let left = self.fuse.get();
        if left == 0 {
            panic!("Bomb {} went off while cloning", self.value);
        }
        self.fuse.set(left - 1);
        Self { value: self.value, fuse: self.fuse.clone() }
    }
}

fn values(arr: &DynArr<Bomb, TrackingAllocator>) -> Vec<i32> {
    arr.iter().map(|bomb| bomb.value).collect()
}

fn bombs(count: i32, fuse: &Rc<Cell<usize>>, alloc: &TrackingAllocator) -> DynArr<Bomb, TrackingAllocator> {
    let mut arr = DynArr::new_in(alloc.clone());
    for i in 0..count {
        arr.push(Bomb::new(i, fuse));
    }
    arr
}

fn assert_balanced(alloc: &TrackingAllocator) {
    let stats = alloc.stats();
    assert_eq!(stats.constructs, stats.destroys, "constructed and destroyed element counts differ: {stats:?}");
    assert_eq!(stats.live_bytes, 0, "memory was leaked: {stats:?}");
}

#[test]
fn dynarr_new() {
    let arr = DynArr::<i32>::new();
    assert_eq!(arr.capacity(), 0);
    assert_eq!(arr.len(), 0);
    assert!(arr.is_empty());
    assert_eq!(arr.begin(), arr.end());

    let arr = DynArr::<i32>::with_capacity(21);
    assert_eq!(arr.capacity(), 21);
    assert_eq!(arr.len(), 0);

    let arr: DynArr<i32> = dynarr![];
    assert_eq!(arr.capacity(), 0);
}

#[test]
fn dynarr_reserve() {
    let mut arr = DynArr::<i32>::new();
    arr.reserve(21);
    assert_eq!(arr.capacity(), 21);

    arr.reserve(4);
    assert_eq!(arr.capacity(), 21);

    let mut arr = DynArr::<i32>::new();
    assert!(matches!(arr.try_reserve(21), Ok(())));
    assert_eq!(arr.capacity(), 21);

    let max = arr.max_size();
    assert_eq!(arr.try_reserve(max + 1), Err(TryReserveError::CapacityOverflow));
    assert_eq!(arr.capacity(), 21);
}

#[test]
fn dynarr_push_and_access() {
    let mut arr = DynArr::<i32>::new();

    arr.push(42);
    assert_eq!(arr.capacity(), 1);
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0], 42);

    arr.push(84);
    assert_eq!(arr.capacity(), 2);
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[1], 84);

    *arr.emplace_back(|| 1) += 5;
    assert_eq!(arr, [42, 84, 6]);
    assert_eq!(arr.front(), Some(&42));
    assert_eq!(arr.back(), Some(&6));

    *arr.front_mut().unwrap() = 1;
    *arr.back_mut().unwrap() = 3;
    assert_eq!(arr, [1, 84, 3]);

    let empty = DynArr::<i32>::new();
    assert_eq!(empty.front(), None);
    assert_eq!(empty.back(), None);
}

#[test]
fn dynarr_growth_doubles() {
    let mut arr = DynArr::new();
    let mut caps = Vec::new();
    for i in 0..9 {
        arr.push(i);
        caps.push(arr.capacity());
    }
    assert_eq!(caps, [1, 2, 4, 4, 8, 8, 8, 8, 16]);
}

#[test]
fn dynarr_reserve_and_push() {
    let mut arr = DynArr::<i32>::new();
    arr.reserve(10);
    let old_cap = arr.capacity();
    let old_ptr = arr.as_ptr();

    for i in 0..10 {
        arr.push(i);
        assert_eq!(arr.capacity(), old_cap);
        assert_eq!(arr.as_ptr(), old_ptr);
    }
    assert_eq!(arr.len(), 10);
    assert_eq!(arr[9], 9);
}

#[test]
fn dynarr_at() {
    let mut arr = dynarr![1, 2, 3];
    assert_eq!(arr.at(0), Ok(&1));
    assert_eq!(arr.at(3), Err(OutOfRangeError { index: 3, len: 3 }));

    *arr.at_mut(2).unwrap() = 7;
    assert_eq!(arr, [1, 2, 7]);
    assert!(arr.at_mut(10).is_err());
}

#[test]
fn dynarr_resize() {
    let mut arr = dynarr![1, 2, 3];
    arr.resize(6, 5);
    assert_eq!(arr, [1, 2, 3, 5, 5, 5]);
    assert_eq!(arr.capacity(), 6);

    let mut arr = dynarr![1, 2, 3];
    arr.resize(2, 5);
    assert_eq!(arr, [1, 2]);
    assert_eq!(arr.capacity(), 3);

    let mut arr = dynarr![1, 2, 3];
    let mut i = 4;
    arr.resize_with(6, || { let res = i; i *= 2; res });
    assert_eq!(arr, [1, 2, 3, 4, 8, 16]);

    let mut arr = dynarr![String::from("a")];
    arr.resize_default(3);
    assert_eq!(arr, ["a", "", ""]);
}

#[test]
fn dynarr_from_array() {
    let arr = dynarr!["hello", "world", "!"];
    assert_eq!(arr, ["hello", "world", "!"]);
    assert_eq!(arr.capacity(), 3);

    let arr = dynarr![7; 4];
    assert_eq!(arr, [7, 7, 7, 7]);

    let arr = DynArr::from(&[1, 2][..]);
    assert_eq!(arr, [1, 2]);
}

#[test]
fn dynarr_shrink() {
    let mut arr = dynarr![1, 2, 3, 4, 5];
    arr.reserve(20);
    assert_eq!(arr.capacity(), 20);

    arr.shrink_to_fit();
    assert_eq!(arr.capacity(), 5);
    assert_eq!(arr, [1, 2, 3, 4, 5]);

    let alloc = TrackingAllocator::new(0);
    let mut arr = DynArr::<u64, _>::with_capacity_in(8, alloc.clone());
    arr.shrink_to_fit();
    assert_eq!(arr.capacity(), 0);
    assert_eq!(alloc.stats().live_bytes, 0);
}

#[test]
fn dynarr_truncate() {
    let mut arr = dynarr![1, 2, 3, 4, 5, 6];
    arr.truncate(3);
    assert_eq!(arr, [1, 2, 3]);

    arr.truncate(10);
    assert_eq!(arr, [1, 2, 3]);
}

#[test]
fn dynarr_insert() {
    let mut arr = dynarr![1, 2, 3, 4, 5, 6];
    let cur = arr.insert(arr.begin() + 2, 42);
    assert_eq!(unsafe { *cur.get() }, 42);
    assert_eq!(arr, [1, 2, 42, 3, 4, 5, 6]);
    assert_eq!(arr.capacity(), 12);

    arr.insert(arr.end(), 84);
    assert_eq!(arr, [1, 2, 42, 3, 4, 5, 6, 84]);

    let cur = arr.insert(arr.begin(), 0);
    assert_eq!(cur.as_ptr(), arr.as_ptr());
    assert_eq!(arr, [0, 1, 2, 42, 3, 4, 5, 6, 84]);
    assert_eq!(arr.capacity(), 12);

    let mut arr = DynArr::new();
    arr.insert(arr.begin(), 'a');
    assert_eq!(arr, ['a']);
}

#[test]
fn dynarr_insert_n() {
    let mut arr = dynarr!['a', 'b', 'c', 'd'];
    let cur = arr.insert_n(arr.begin() + 2, 2, &'x');
    assert_eq!(arr, ['a', 'b', 'x', 'x', 'c', 'd']);
    assert_eq!(arr.capacity(), 6);
    assert_eq!(cur - CursorMut::from_ptr(arr.as_mut_ptr()), 2);

    // Fits, fewer inserted elements than elements after the insert position
    let mut arr = dynarr![1, 2, 3, 4, 5];
    arr.reserve(16);
    arr.insert_n(arr.begin() + 1, 2, &0);
    assert_eq!(arr, [1, 0, 0, 2, 3, 4, 5]);

    // Fits, more inserted elements than elements after the insert position
    let mut arr = dynarr![1, 2, 3, 4, 5];
    arr.reserve(16);
    arr.insert_n(arr.begin() + 4, 3, &0);
    assert_eq!(arr, [1, 2, 3, 4, 0, 0, 0, 5]);
    assert_eq!(arr.capacity(), 16);

    let cur = arr.insert_n(arr.begin() + 1, 0, &9);
    assert_eq!(unsafe { *cur.get() }, 2);
    assert_eq!(arr.len(), 8);

    let mut arr = DynArr::new();
    arr.insert_n(arr.end(), 3, &String::from("s"));
    assert_eq!(arr, ["s", "s", "s"]);
}

#[test]
fn dynarr_erase() {
    let mut arr = dynarr!['a', 'b', 'c', 'd'];
    let cur = arr.erase(arr.begin() + 1);
    assert_eq!(arr, ['a', 'c', 'd']);
    assert_eq!(unsafe { *cur.get() }, 'c');
    assert_eq!(arr.capacity(), 4);

    let mut arr = dynarr![1, 2, 3, 4, 5, 6];
    let cur = arr.erase_range(arr.begin() + 1, arr.begin() + 4);
    assert_eq!(arr, [1, 5, 6]);
    assert_eq!(unsafe { *cur.get() }, 5);

    let end = arr.end();
    let cur = arr.erase_range(end, end);
    assert_eq!(Cursor::from(cur), arr.end());

    arr.erase_range(arr.begin(), arr.end());
    assert!(arr.is_empty());
}

#[test]
#[should_panic(expected = "Cursor does not point into the dynamic array")]
fn dynarr_insert_outside() {
    let mut arr = dynarr![1, 2, 3];
    arr.insert(arr.end() + 1, 4);
}

#[test]
#[should_panic(expected = "Cannot erase the end of a dynamic array")]
fn dynarr_erase_end() {
    let mut arr = dynarr![1, 2, 3];
    arr.erase(arr.end());
}

#[test]
fn dynarr_pop() {
    let mut arr = dynarr![1, 2, 3];
    assert_eq!(arr.pop(), Some(3));
    assert_eq!(arr.pop(), Some(2));
    assert_eq!(arr.pop(), Some(1));
    assert_eq!(arr.pop(), None);

    let alloc = TrackingAllocator::new(0);
    let mut arr = DynArr::new_in(alloc.clone());
    arr.extend([String::from("a"), String::from("b")]);
    arr.pop_back();
    assert_eq!(arr, ["a"]);
    assert_eq!(alloc.stats().destroys, 1);
}

#[test]
#[should_panic(expected = "Cannot pop the back of an empty dynamic array")]
fn dynarr_pop_back_empty() {
    let mut arr = DynArr::<i32>::new();
    arr.pop_back();
}

#[test]
fn dynarr_clear() {
    let alloc = TrackingAllocator::new(0);
    let mut arr = DynArr::new_in(alloc.clone());
    arr.extend([1, 2, 3, 4]);
    let cap = arr.capacity();

    arr.clear();
    assert!(arr.is_empty());
    assert_eq!(arr.capacity(), cap);

    let allocs = alloc.stats().allocs;
    arr.extend([5, 6, 7, 8]);
    assert_eq!(arr, [5, 6, 7, 8]);
    assert_eq!(alloc.stats().allocs, allocs);
}

#[test]
fn dynarr_assign() {
    let mut arr = dynarr![1, 2, 3];
    arr.assign_iter(10..15);
    assert_eq!(arr, [10, 11, 12, 13, 14]);

    arr.assign_from_slice(&[7, 8]);
    assert_eq!(arr, [7, 8]);

    arr.assign_n(4, 1);
    assert_eq!(arr, [1, 1, 1, 1]);
}

#[test]
fn dynarr_extend() {
    let mut arr = dynarr![1, 2, 3];
    arr.extend([4, 5, 6]);
    assert_eq!(arr, [1, 2, 3, 4, 5, 6]);

    arr.extend(&[7, 8]);
    assert_eq!(arr, [1, 2, 3, 4, 5, 6, 7, 8]);

    let arr: DynArr<_> = (0..5).map(|x| x * 2).collect();
    assert_eq!(arr, [0, 2, 4, 6, 8]);
}

#[test]
fn dynarr_into_iter() {
    let arr = dynarr![0, 1, 2, 3, 4];
    for (idx, elem) in arr.into_iter().enumerate() {
        assert_eq!(idx as u32, elem);
    }

    let mut arr = dynarr![1, 2, 3];
    for elem in &mut arr {
        *elem *= 2;
    }
    assert_eq!((&arr).into_iter().sum::<i32>(), 12);
}

#[test]
fn dynarr_cursors() {
    let mut arr = dynarr![1, 2, 3, 4];
    assert_eq!(arr.end() - arr.begin(), 4);

    let mut cur = arr.begin_mut();
    while cur != arr.end_mut() {
        unsafe { *cur.get_mut() += 10 };
        cur.inc();
    }
    assert_eq!(arr, [11, 12, 13, 14]);

    let cur = arr.begin();
    assert_eq!(unsafe { *cur.at(3) }, 14);
}

#[test]
fn dynarr_traits() {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let arr = dynarr![3, 1, 2];
    let other = dynarr![3, 1, 2];
    assert_eq!(arr, other);
    assert!(arr < dynarr![3, 2]);
    assert_eq!(format!("{arr:?}"), "[3, 1, 2]");

    let hash = |arr: &DynArr<i32>| {
        let mut hasher = DefaultHasher::new();
        arr.hash(&mut hasher);
        hasher.finish()
    };
    assert_eq!(hash(&arr), hash(&other));

    let slice: &[i32] = arr.as_ref();
    assert_eq!(slice, &[3, 1, 2]);
    assert_eq!(DynArr::<i32>::default().len(), 0);
}

#[test]
fn dynarr_zero_sized() {
    let mut arr = DynArr::new();
    for _ in 0..10 {
        arr.push(());
    }
    assert_eq!(arr.len(), 10);
    assert_eq!(arr.capacity(), usize::MAX);

    arr.erase(arr.begin() + 3);
    assert_eq!(arr.len(), 9);

    arr.insert(arr.end(), ());
    arr.insert_n(arr.begin(), 5, &());
    assert_eq!(arr.len(), 15);
    assert_eq!(arr.end() - arr.begin(), 15);

    arr.erase_range(arr.begin(), arr.end());
    assert!(arr.is_empty());
}

//--------------------------------------------------------------
// Copy and move

#[test]
fn dynarr_clone() {
    let mut arr = dynarr![String::from("a"), String::from("b")];
    arr.reserve(10);

    let mut copy = arr.clone();
    assert_eq!(copy, arr);
    assert_eq!(copy.capacity(), 10);

    copy[0].push('!');
    copy.push(String::from("c"));
    assert_eq!(arr, ["a", "b"]);
    assert_eq!(copy, ["a!", "b", "c"]);
}

#[test]
fn dynarr_clone_from() {
    // Reuses storage
    let source = dynarr![1, 2, 3];
    let mut arr = dynarr![9, 9, 9, 9, 9];
    let ptr = arr.as_ptr();
    arr.clone_from(&source);
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.as_ptr(), ptr);
    assert_eq!(arr.capacity(), 5);

    let mut arr = dynarr![9];
    arr.reserve(4);
    arr.clone_from(&source);
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.capacity(), 4);

    // Needs new storage
    let mut source = dynarr![1, 2, 3];
    source.reserve(8);
    let mut arr = dynarr![9];
    arr.clone_from(&source);
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.capacity(), 8);
}

#[test]
fn dynarr_clone_from_propagates() {
    let src_alloc = TrackingAllocator::new(1).with_policy(AllocPolicy::PROPAGATE);
    let dst_alloc = TrackingAllocator::new(2);

    let mut source = DynArr::new_in(src_alloc.clone());
    source.extend([1, 2, 3]);
    let mut arr = DynArr::new_in(dst_alloc.clone());
    arr.extend([9; 5]);

    arr.clone_from(&source);
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.allocator().id(), 1);
    assert_eq!(dst_alloc.stats().live_bytes, 0);

    drop(arr);
    drop(source);
    assert_balanced(&src_alloc);
    assert_balanced(&dst_alloc);
}

#[test]
fn dynarr_clone_from_propagating_failure() {
    let src_alloc = TrackingAllocator::new(2).with_policy(AllocPolicy::PROPAGATE);
    let dst_alloc = TrackingAllocator::new(1);

    let mut source = DynArr::new_in(src_alloc.clone());
    source.extend([7, 8]);
    let mut arr = DynArr::new_in(dst_alloc.clone());
    arr.extend([1, 2, 3]);
    let ptr = arr.as_ptr();

    src_alloc.set_allocs_left(Some(0));
    assert!(matches!(arr.try_clone_from(&source), Err(TryReserveError::AllocError { .. })));
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.as_ptr(), ptr);
    assert_eq!(arr.capacity(), 3);
    assert_eq!(arr.allocator().id(), 1);
    src_alloc.set_allocs_left(None);

    // A panicking clone leaves the destination untouched as well
    let fuse = Rc::new(Cell::new(usize::MAX));
    let bomb_src_alloc = TrackingAllocator::new(3).with_policy(AllocPolicy::PROPAGATE);
    let bomb_dst_alloc = TrackingAllocator::new(4);
    let bomb_source = bombs(4, &fuse, &bomb_src_alloc);
    let mut bomb_arr = bombs(2, &fuse, &bomb_dst_alloc);

    fuse.set(2);
    let res = panic::catch_unwind(AssertUnwindSafe(|| bomb_arr.clone_from(&bomb_source)));
    assert!(res.is_err());
    assert_eq!(values(&bomb_arr), [0, 1]);
    assert_eq!(bomb_arr.allocator().id(), 4);

    drop(bomb_arr);
    drop(bomb_source);
    assert_balanced(&bomb_src_alloc);
    assert_balanced(&bomb_dst_alloc);
}

#[test]
fn dynarr_clone_from_keeps_allocator() {
    let src_alloc = TrackingAllocator::new(1);
    let dst_alloc = TrackingAllocator::new(2);

    let mut source = DynArr::new_in(src_alloc.clone());
    source.extend([1, 2, 3]);
    let mut arr = DynArr::new_in(dst_alloc.clone());
    arr.extend([9; 5]);

    arr.clone_from(&source);
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.allocator().id(), 2);
    assert_eq!(arr.capacity(), 5);
}

#[test]
fn dynarr_clone_selects_allocator() {
    let policy = AllocPolicy::DEFAULT.with_select_on_copy_construct(true);
    let alloc = TrackingAllocator::new(4).with_policy(policy);
    let mut arr = DynArr::new_in(alloc.clone());
    arr.extend([1, 2]);

    let copy = arr.clone();
    assert_eq!(copy, [1, 2]);
    assert_eq!(alloc.stats().copy_selections, 1);

    let alloc = TrackingAllocator::new(5);
    let mut arr = DynArr::new_in(alloc.clone());
    arr.push(1);
    let _copy = arr.clone();
    assert_eq!(alloc.stats().copy_selections, 0);
}

#[test]
fn dynarr_take() {
    let mut arr = dynarr![1, 2, 3];
    let ptr = arr.as_ptr();

    let taken = arr.take();
    assert_eq!(taken, [1, 2, 3]);
    assert_eq!(taken.as_ptr(), ptr);
    assert_eq!(arr.len(), 0);
    assert_eq!(arr.capacity(), 0);
}

#[test]
fn dynarr_move_from_equal_allocators() {
    let alloc = TrackingAllocator::new(1);
    let mut source = DynArr::new_in(alloc.clone());
    source.extend([1, 2, 3]);
    let mut arr = DynArr::new_in(alloc.clone());
    arr.push(7);

    let ptr = source.as_ptr();
    arr.move_from(&mut source);
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.as_ptr(), ptr);
    assert_eq!(source.len(), 0);
    assert_eq!(source.capacity(), 0);

    drop(arr);
    drop(source);
    assert_balanced(&alloc);
}

#[test]
fn dynarr_move_from_unequal_allocators() {
    let src_alloc = TrackingAllocator::new(1);
    let dst_alloc = TrackingAllocator::new(2);

    let mut source = DynArr::new_in(src_alloc.clone());
    source.extend(["a", "b", "c"].map(String::from));
    let mut arr = DynArr::new_in(dst_alloc.clone());
    arr.push(String::from("x"));

    arr.move_from(&mut source);
    assert_eq!(arr, ["a", "b", "c"]);
    assert_eq!(arr.allocator().id(), 2);
    assert_eq!(arr.capacity(), 3);
    assert_eq!(source.len(), 0);
    assert_eq!(source.capacity(), 0);
    assert_eq!(src_alloc.stats().live_bytes, 0);

    drop(arr);
    let src = src_alloc.stats();
    let dst = dst_alloc.stats();
    assert_eq!(src.constructs + dst.constructs, src.destroys + dst.destroys);
    assert_eq!(dst.live_bytes, 0);
}

#[test]
fn dynarr_move_from_propagates() {
    let src_alloc = TrackingAllocator::new(1).with_policy(AllocPolicy::PROPAGATE);
    let dst_alloc = TrackingAllocator::new(2);

    let mut source = DynArr::new_in(src_alloc.clone());
    source.extend([1, 2, 3]);
    let mut arr = DynArr::new_in(dst_alloc.clone());
    arr.push(7);

    let ptr = source.as_ptr();
    arr.move_from(&mut source);
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.as_ptr(), ptr);
    assert_eq!(arr.allocator().id(), 1);
    assert_eq!(dst_alloc.stats().live_bytes, 0);
}

//--------------------------------------------------------------
// Failure handling

#[test]
fn dynarr_allocation_failure() {
    let alloc = TrackingAllocator::new(0);
    let mut arr = DynArr::new_in(alloc.clone());
    arr.push(1);

    alloc.set_allocs_left(Some(0));
    assert_eq!(arr.try_push(2), Err(TryReserveError::AllocError { layout: Layout::new::<[i32; 2]>() }));
    assert!(matches!(arr.try_reserve(10), Err(TryReserveError::AllocError { .. })));
    assert!(matches!(arr.try_resize(4, 0), Err(TryReserveError::AllocError { .. })));
    assert!(matches!(arr.try_insert(arr.begin(), 0), Err(TryReserveError::AllocError { .. })));
    assert!(matches!(arr.try_insert_n(arr.begin(), 3, &0), Err(TryReserveError::AllocError { .. })));
    assert!(matches!(arr.try_clone(), Err(TryReserveError::AllocError { .. })));
    assert_eq!(arr, [1]);
    assert_eq!(arr.capacity(), 1);

    let max = arr.max_size();
    assert_eq!(arr.try_reserve(max + 1), Err(TryReserveError::CapacityOverflow));
    assert_eq!(arr.try_insert_n(arr.end(), usize::MAX, &0).err(), Some(TryReserveError::CapacityOverflow));

    alloc.set_allocs_left(None);
    arr.push(2);
    assert_eq!(arr, [1, 2]);
}

#[test]
fn dynarr_emplace_panic_is_strong() {
    let alloc = TrackingAllocator::new(0);
    let mut arr = DynArr::new_in(alloc.clone());
    arr.extend([1, 2, 3]);
    assert_eq!(arr.capacity(), 3);

    // Full, the panic happens after the elements were relocated
    let res = panic::catch_unwind(AssertUnwindSafe(|| { arr.emplace_back(|| panic!("generator failed")); }));
    assert!(res.is_err());
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.capacity(), 3);

    arr.reserve(8);
    let res = panic::catch_unwind(AssertUnwindSafe(|| { arr.emplace_back(|| panic!("generator failed")); }));
    assert!(res.is_err());
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.capacity(), 8);

    drop(arr);
    assert_balanced(&alloc);
}

#[test]
fn dynarr_resize_panic_is_strong() {
    let fuse = Rc::new(Cell::new(usize::MAX));
    let alloc = TrackingAllocator::new(0);
    let mut arr = bombs(3, &fuse, &alloc);
    assert_eq!(arr.capacity(), 4);

    // Reallocating
    let value = Bomb::new(42, &fuse);
    fuse.set(2);
    let res = panic::catch_unwind(AssertUnwindSafe(|| arr.resize(8, value)));
    assert!(res.is_err());
    assert_eq!(values(&arr), [0, 1, 2]);
    assert_eq!(arr.capacity(), 4);

    // In place
    fuse.set(usize::MAX);
    arr.reserve(16);
    let value = Bomb::new(42, &fuse);
    fuse.set(2);
    let res = panic::catch_unwind(AssertUnwindSafe(|| arr.resize(8, value)));
    assert!(res.is_err());
    assert_eq!(values(&arr), [0, 1, 2]);
    assert_eq!(arr.capacity(), 16);

    drop(arr);
    assert_balanced(&alloc);
}

#[test]
fn dynarr_insert_n_panic() {
    let fuse = Rc::new(Cell::new(usize::MAX));
    let alloc = TrackingAllocator::new(0);

    // Reallocating leaves the array untouched
    let mut arr = bombs(3, &fuse, &alloc);
    arr.shrink_to_fit();
    let value = Bomb::new(9, &fuse);
    fuse.set(2);
    let res = panic::catch_unwind(AssertUnwindSafe(|| { arr.insert_n(arr.begin() + 1, 4, &value); }));
    assert!(res.is_err());
    assert_eq!(values(&arr), [0, 1, 2]);
    assert_eq!(arr.capacity(), 3);
    drop(arr);

    // In place keeps the copies made so far
    fuse.set(usize::MAX);
    let mut arr = bombs(5, &fuse, &alloc);
    arr.reserve(16);
    fuse.set(2);
    let res = panic::catch_unwind(AssertUnwindSafe(|| { arr.insert_n(arr.begin() + 1, 3, &value); }));
    assert!(res.is_err());
    assert_eq!(values(&arr), [0, 9, 9, 1, 2, 3, 4]);
    assert_eq!(arr.capacity(), 16);
    drop(arr);

    assert_balanced(&alloc);
}

#[test]
fn dynarr_insert_n_past_end_panic() {
    let fuse = Rc::new(Cell::new(usize::MAX));
    let alloc = TrackingAllocator::new(0);
    let value = Bomb::new(9, &fuse);

    // Copies past the current end fail, nothing was moved yet
    let mut arr = bombs(3, &fuse, &alloc);
    arr.reserve(10);
    fuse.set(2);
    let res = panic::catch_unwind(AssertUnwindSafe(|| { arr.insert_n(arr.begin() + 2, 4, &value); }));
    assert!(res.is_err());
    assert_eq!(values(&arr), [0, 1, 2]);
    assert_eq!(arr.capacity(), 10);
    drop(arr);

    // Copies past the current end succeed, filling the slot of the moved element fails
    fuse.set(usize::MAX);
    let mut arr = bombs(3, &fuse, &alloc);
    arr.reserve(10);
    fuse.set(3);
    let res = panic::catch_unwind(AssertUnwindSafe(|| { arr.insert_n(arr.begin() + 2, 4, &value); }));
    assert!(res.is_err());
    assert_eq!(values(&arr), [0, 1, 9, 9, 9, 2]);
    drop(arr);

    // Inserting at the end only makes copies past the end
    fuse.set(usize::MAX);
    let mut arr = bombs(2, &fuse, &alloc);
    arr.reserve(10);
    fuse.set(1);
    let res = panic::catch_unwind(AssertUnwindSafe(|| { arr.insert_n(arr.end(), 3, &value); }));
    assert!(res.is_err());
    assert_eq!(values(&arr), [0, 1]);
    drop(arr);

    assert_balanced(&alloc);
}

#[test]
fn dynarr_insert_construct_panic() {
    let alloc = TrackingAllocator::new(0);
    let mut arr = DynArr::new_in(alloc.clone());
    arr.extend(["a", "b", "c"].map(String::from));
    arr.reserve(8);

    alloc.set_constructs_left(Some(0));
    let res = panic::catch_unwind(AssertUnwindSafe(|| { arr.insert(arr.begin() + 1, String::from("x")); }));
    assert!(res.is_err());
    assert_eq!(arr, ["a", "b", "c"]);
    assert_eq!(arr.capacity(), 8);

    alloc.set_constructs_left(None);
    arr.insert(arr.begin() + 1, String::from("x"));
    assert_eq!(arr, ["a", "x", "b", "c"]);

    drop(arr);
    assert_balanced(&alloc);
}

#[test]
fn dynarr_clone_panic_releases() {
    let fuse = Rc::new(Cell::new(usize::MAX));
    let alloc = TrackingAllocator::new(0);
    let arr = bombs(5, &fuse, &alloc);

    fuse.set(3);
    let res = panic::catch_unwind(AssertUnwindSafe(|| arr.clone()));
    assert!(res.is_err());
    assert_eq!(alloc.stats().live_allocs(), 1);

    // Growing copy assignment leaves the destination untouched
    fuse.set(usize::MAX);
    let mut dst = bombs(1, &fuse, &alloc);
    fuse.set(2);
    let res = panic::catch_unwind(AssertUnwindSafe(|| dst.clone_from(&arr)));
    assert!(res.is_err());
    assert_eq!(values(&dst), [0]);
    assert_eq!(dst.capacity(), 1);

    drop(dst);
    drop(arr);
    assert_balanced(&alloc);
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

static TEST_LOGGER: Lazy<Logger> = Lazy::new(|| {
    let logger = Logger::new();
    logger.set_log_to_console(false);
    logger.set_always_flush(true);
    logger
});

#[test]
fn dynarr_shrink_failure_is_logged() {
    let buffer = SharedBuffer::default();
    let slot = TEST_LOGGER.add_writer(Box::new(buffer.clone())).ok();
    onca_logging::set_logger(&TEST_LOGGER);

    let alloc = TrackingAllocator::new(0);
    let mut arr = DynArr::with_capacity_in(8, alloc.clone());
    arr.extend([1, 2, 3]);

    alloc.set_allocs_left(Some(0));
    arr.shrink_to_fit();
    assert_eq!(arr, [1, 2, 3]);
    assert_eq!(arr.capacity(), 8);

    let contents = buffer.contents();
    assert!(contents.contains("[Collections(DynArr)]"));
    assert!(contents.contains("Could not shrink dynamic array from capacity 8 to 3"));

    onca_logging::clear_logger();
    if let Some(slot) = slot {
        TEST_LOGGER.remove_writer(slot);
    }
}

//--------------------------------------------------------------
// Properties

#[derive(Clone, Debug)]
enum Op {
    Push(i32),
    Pop,
    Insert(usize, i32),
    InsertN(usize, u8, i32),
    Erase(usize),
    Resize(usize, i32),
    Truncate(usize),
    Reserve(usize),
    Clear,
    Shrink,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i32>().prop_map(Op::Push),
        Just(Op::Pop),
        (any::<usize>(), any::<i32>()).prop_map(|(pos, val)| Op::Insert(pos, val)),
        (any::<usize>(), 0u8..8, any::<i32>()).prop_map(|(pos, count, val)| Op::InsertN(pos, count, val)),
        any::<usize>().prop_map(Op::Erase),
        (0usize..48, any::<i32>()).prop_map(|(len, val)| Op::Resize(len, val)),
        (0usize..48).prop_map(Op::Truncate),
        (0usize..64).prop_map(Op::Reserve),
        Just(Op::Clear),
        Just(Op::Shrink),
    ]
}

proptest! {
    #[test]
    fn push_sequences(values in proptest::collection::vec(any::<i64>(), 0..200)) {
        let mut arr = DynArr::new();
        let mut last_cap = 0;
        for (i, value) in values.iter().enumerate() {
            arr.push(*value);
            prop_assert_eq!(arr.len(), i + 1);
            prop_assert!(arr.capacity() >= arr.len());
            prop_assert!(arr.capacity() >= last_cap);
            last_cap = arr.capacity();
        }
        prop_assert_eq!(arr.as_slice(), values.as_slice());
    }

    #[test]
    fn behaves_like_vec(ops in proptest::collection::vec(arb_op(), 0..64)) {
        let alloc = TrackingAllocator::new(0);
        let mut arr = DynArr::new_in(alloc.clone());
        let mut model = Vec::new();

        for op in ops {
            match op {
                Op::Push(val) => {
                    arr.push(val);
                    model.push(val);
                },
                Op::Pop => {
                    prop_assert_eq!(arr.pop(), model.pop());
                },
                Op::Insert(pos, val) => {
                    let idx = pos % (model.len() + 1);
                    arr.insert(arr.begin() + idx as isize, val);
                    model.insert(idx, val);
                },
                Op::InsertN(pos, count, val) => {
                    let idx = pos % (model.len() + 1);
                    arr.insert_n(arr.begin() + idx as isize, count as usize, &val);
                    model.splice(idx..idx, std::iter::repeat(val).take(count as usize));
                },
                Op::Erase(pos) => if !model.is_empty() {
                    let idx = pos % model.len();
                    arr.erase(arr.begin() + idx as isize);
                    model.remove(idx);
                },
                Op::Resize(len, val) => {
                    arr.resize(len, val);
                    model.resize(len, val);
                },
                Op::Truncate(len) => {
                    arr.truncate(len);
                    model.truncate(len);
                },
                Op::Reserve(cap) => {
                    arr.reserve(cap);
                    prop_assert!(arr.capacity() >= cap);
                },
                Op::Clear => {
                    arr.clear();
                    model.clear();
                },
                Op::Shrink => {
                    arr.shrink_to_fit();
                    prop_assert_eq!(arr.capacity(), arr.len());
                },
            }
            prop_assert_eq!(arr.as_slice(), model.as_slice());
            prop_assert!(arr.capacity() >= arr.len());
        }

        drop(arr);
        prop_assert_eq!(alloc.stats().live_bytes, 0);
    }
}
