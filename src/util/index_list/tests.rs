use nonmax::NonMaxUsize;

use super::IndexList;

fn values<T: Copy>(list: &IndexList<T>) -> Vec<T> {
    list.iter().map(|(_, v)| *v).collect()
}

#[test]
fn index_list() {
    let mut list = IndexList::new();
    assert!(list.first().is_none());
    assert_eq!(list.len(), 0);

    let zero = list.push_back(0);
    assert_eq!(list.first(), Some(zero));
    assert_eq!(list.remove(zero), Some(0));
    assert!(list.first().is_none());

    let one = list.push_back(1);
    let two = list.push_back(2);
    assert_eq!(list.first(), Some(one));
    assert_eq!(list.next(one), Some(two));
    assert_eq!(list.next(two), None);
    assert_eq!(list.len(), 2);
}

#[test]
fn move_to_back_and_remove() {
    let mut list = IndexList::new();
    let indices: Vec<_> = (0..5).map(|i| list.push_back(i)).collect();

    list.move_to_back(indices[0]);
    list.move_to_back(indices[2]);
    assert_eq!(values(&list), [1, 3, 4, 0, 2]);

    // Already last, nothing changes.
    list.move_to_back(indices[2]);
    assert_eq!(values(&list), [1, 3, 4, 0, 2]);

    assert_eq!(list.remove(indices[4]), Some(4));
    assert_eq!(list.remove(indices[4]), None);
    assert_eq!(values(&list), [1, 3, 0, 2]);
    assert_eq!(list.len(), 4);

    let rev: Vec<_> = list.iter().rev().map(|(_, v)| *v).collect();
    assert_eq!(rev, [2, 0, 3, 1]);
}

#[test]
fn slots_are_recycled() {
    let mut list = IndexList::new();
    let a = list.push_back('a');
    list.push_back('b');
    list.remove(a);

    let c = list.push_back('c');
    assert_eq!(a, c);
    assert_eq!(list[c], 'c');
    assert_eq!(values(&list), ['b', 'c']);
    assert!(list.get(NonMaxUsize::new(17).unwrap()).is_none());
}

#[test]
fn walk_with_next() {
    let mut list = IndexList::new();
    for i in 0..4 {
        list.push_back(i);
    }

    let mut seen = Vec::new();
    let mut cursor = list.first();
    while let Some(index) = cursor {
        seen.push(list[index]);
        cursor = list.next(index);
    }
    assert_eq!(seen, [0, 1, 2, 3]);

    while let Some(first) = list.first() {
        list.remove(first);
    }
    assert_eq!(list.len(), 0);
    assert!(list.iter().next().is_none());
}
