//! Canonical-Huffman construction, built incrementally rather than as a
//! one-shot flat-table build: ZipRec has to grow a `Tree` symbol-by-symbol
//! while it parses a streaming precode RLE run, so the cursor has to be
//! able to stop and resume between symbols (see §4.1).

use crate::bitstream::BitStream;
use crate::DeflateInput;

pub type HuffSymbol = u16;
pub const INVALID_SYMBOL: HuffSymbol = u16::MAX;

/// DEFLATE code lengths are at most 15 bits; index 0 is reserved for
/// "unused symbol" bookkeeping.
pub const MAX_HUFFMAN_LENGTH: usize = 16;

/// Collects `(symbol, bit-length)` pairs and exposes them in canonical
/// order (ascending length, insertion order within a length).
#[derive(Debug, Clone)]
pub struct LengthTable {
    by_length: Vec<Vec<HuffSymbol>>,
    zero_length_count: usize,
}

impl Default for LengthTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LengthTable {
    pub fn new() -> Self {
        Self {
            by_length: vec![Vec::new(); MAX_HUFFMAN_LENGTH],
            zero_length_count: 0,
        }
    }

    pub fn add_symbol(&mut self, symbol: HuffSymbol, length: usize) {
        if length > 0 {
            self.by_length[length].push(symbol);
        } else {
            // just count zero-length entries, to detect an all-zero table
            self.zero_length_count += 1;
        }
    }

    /// DEFLATE's fixed literal/length table: lengths 8/9/7/8 over the
    /// respective symbol ranges.
    pub fn make_default_literals(&mut self) {
        for sym in 0..=143u16 {
            self.add_symbol(sym, 8);
        }
        for sym in 144..=255u16 {
            self.add_symbol(sym, 9);
        }
        for sym in 256..=279u16 {
            self.add_symbol(sym, 7);
        }
        for sym in 280..=287u16 {
            self.add_symbol(sym, 8);
        }
    }

    /// DEFLATE's fixed distance table: length 5 for every distance code.
    pub fn make_default_distances(&mut self) {
        for sym in 0..=31u16 {
            self.add_symbol(sym, 5);
        }
    }

    pub fn count(&self, length: usize) -> usize {
        if length == 0 {
            self.zero_length_count
        } else {
            self.by_length[length].len()
        }
    }

    pub fn symbol(&self, length: usize, offset: usize) -> HuffSymbol {
        self.by_length[length][offset]
    }

    /// Rejects tables consisting entirely of zero-length entries.
    pub fn is_valid(&self) -> bool {
        (1..MAX_HUFFMAN_LENGTH).any(|len| self.count(len) > 0)
    }

    /// Symbols in canonical order: ascending length, insertion order
    /// within a length.
    pub fn iter_canonical(&self) -> impl Iterator<Item = (HuffSymbol, usize)> + '_ {
        (1..MAX_HUFFMAN_LENGTH)
            .flat_map(move |len| self.by_length[len].iter().map(move |&sym| (sym, len)))
    }
}

const INVALID_NODE: u32 = u32::MAX;

/// Reverses the low `k` bits of `value`. Codes are assigned to tree slots
/// in natural MSB-first numeric order during construction, but DEFLATE
/// transmits each code's bits in the opposite order, so the raw bits
/// pulled off the bitstream have to be reversed before they're usable as
/// a table index (`huffman.C`'s `nextBitsReversed`).
fn reverse_bits(value: usize, k: usize) -> usize {
    let mut v = value;
    let mut r = 0usize;
    for _ in 0..k {
        r = (r << 1) | (v & 1);
        v >>= 1;
    }
    r
}

#[derive(Debug)]
struct TreeNode {
    /// number of bits this node consumes (`k`); it has `2^k` child slots
    bits: u32,
    /// accumulated code length of the parent chain leading to this node
    prefix_len: u32,
    children: Vec<u32>,
    symbols: Vec<HuffSymbol>,
    parent: u32,
    parent_slot: u32,
}

impl TreeNode {
    fn new(bits: u32, prefix_len: u32, parent: u32, parent_slot: u32) -> Self {
        let entries = 1usize << bits;
        Self {
            bits,
            prefix_len,
            children: vec![INVALID_NODE; entries],
            symbols: vec![INVALID_SYMBOL; entries],
            parent,
            parent_slot,
        }
    }
}

/// A cursor position within a [`Tree`]: the active node plus the next
/// child slot to fill or consume. Equivalent to the original's
/// `HuffmanLocation`, minus the `LengthTable` variant (callers drive
/// `LengthTable` iteration themselves via [`LengthTable::iter_canonical`]).
#[derive(Debug, Clone, Copy)]
pub struct TreeCursor {
    node: u32,
    offset: usize,
}

/// A prefix-decoding structure addressable by common-bit-count-per-node:
/// each node consumes `k` bits and has `2^k` child slots, each either
/// empty, a terminal symbol, or a pointer to a deeper sub-node.
///
/// The root starts with zero committed bits: it is a bare dispatch slot
/// that hasn't seen a symbol yet, so nothing is pre-rejected as
/// non-monotonic. The first symbol processed in canonical order (the
/// table's minimum code length) is what actually sizes the tree's
/// top-level node, via the same `length > codelen` growth `add_symbol`
/// uses at every other depth. Since canonical order is ascending-length,
/// that first node ends up holding the most common codes — matching the
/// "tuned to cover the common case in one lookup" shape without having
/// to special-case the root's width up front.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    root: u32,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            nodes: vec![TreeNode::new(0, 0, INVALID_NODE, 0)],
            root: 0,
        }
    }

    pub fn cursor(&self) -> TreeCursor {
        TreeCursor {
            node: self.root,
            offset: 0,
        }
    }

    fn child_count(&self, node: u32) -> usize {
        self.nodes[node as usize].children.len()
    }

    fn code_length(&self, node: u32) -> u32 {
        let n = &self.nodes[node as usize];
        n.prefix_len + n.bits
    }

    fn alloc_node(&mut self, bits: u32, prefix_len: u32, parent: u32, parent_slot: u32) -> u32 {
        self.nodes.push(TreeNode::new(bits, prefix_len, parent, parent_slot));
        (self.nodes.len() - 1) as u32
    }

    /// Extends the tree along the canonical-code path at `cursor`. If
    /// `length` is greater than the accumulated depth at the cursor, a
    /// sub-node covering the extra depth is allocated and the cursor
    /// descends into it. A `length` shorter than the current depth is a
    /// protocol error (non-monotonic lengths).
    pub fn add_symbol(&mut self, cursor: &mut TreeCursor, symbol: HuffSymbol, length: u32) -> bool {
        let codelen = self.code_length(cursor.node);
        if length < codelen {
            return false;
        }
        if length > codelen {
            let extra = length - codelen;
            let new_node = self.alloc_node(extra, codelen, cursor.node, cursor.offset as u32);
            self.nodes[cursor.node as usize].children[cursor.offset] = new_node;
            cursor.node = new_node;
            cursor.offset = 0;
        }
        let node = &mut self.nodes[cursor.node as usize];
        node.children[cursor.offset] = INVALID_NODE;
        node.symbols[cursor.offset] = symbol;
        true
    }

    /// Moves the cursor to the next unfilled slot, walking up to parents
    /// as needed. Returns `false` once every slot in the tree is filled.
    pub fn advance(&self, cursor: &mut TreeCursor) -> bool {
        cursor.offset += 1;
        loop {
            if cursor.offset < self.child_count(cursor.node) {
                return true;
            }
            let node = &self.nodes[cursor.node as usize];
            if node.parent == INVALID_NODE {
                return false;
            }
            let mut cur = node.parent;
            let mut slot = node.parent_slot as usize + 1;
            loop {
                if slot < self.child_count(cur) {
                    cursor.node = cur;
                    cursor.offset = slot;
                    return true;
                }
                let n = &self.nodes[cur as usize];
                if n.parent == INVALID_NODE {
                    return false;
                }
                slot = n.parent_slot as usize + 1;
                cur = n.parent;
            }
        }
    }

    /// Consumes bits from `bitstream` (DEFLATE convention: bits read
    /// LSB-first, code bits reversed when forming the table index) and
    /// returns the decoded symbol, or `None` if the cursor lands on an
    /// empty slot.
    pub fn next_symbol<'a, I: DeflateInput>(&self, bitstream: &mut BitStream<'a, I>) -> Option<HuffSymbol> {
        let mut node = self.root;
        loop {
            let n = &self.nodes[node as usize];
            let k = n.bits as usize;
            if k == 0 {
                // the root starts uncommitted and holds a single child slot;
                // descend through it without consuming any bits.
                let sym = n.symbols[0];
                if sym != INVALID_SYMBOL {
                    return Some(sym);
                }
                let child = n.children[0];
                if child == INVALID_NODE {
                    return None;
                }
                node = child;
                continue;
            }
            bitstream.ensure_bits::<true>(k);
            let raw = bitstream.bits(k) as usize;
            let index = reverse_bits(raw, k);
            let n = &self.nodes[node as usize];
            let sym = n.symbols[index];
            if sym != INVALID_SYMBOL {
                bitstream.remove_bits(k);
                return Some(sym);
            }
            let child = n.children[index];
            if child == INVALID_NODE {
                return None;
            }
            bitstream.remove_bits(k);
            node = child;
        }
    }

    /// Walks every assigned symbol in prefix order, yielding
    /// `(symbol, code_length)`.
    pub fn iterate(&self) -> Vec<(HuffSymbol, u32)> {
        let mut out = Vec::new();
        self.iterate_node(self.root, &mut out);
        out
    }

    fn iterate_node(&self, node: u32, out: &mut Vec<(HuffSymbol, u32)>) {
        let n = &self.nodes[node as usize];
        for i in 0..n.children.len() {
            if n.symbols[i] != INVALID_SYMBOL {
                out.push((n.symbols[i], n.prefix_len + n.bits));
            } else if n.children[i] != INVALID_NODE {
                self.iterate_node(n.children[i], out);
            }
        }
    }
}

/// Builds a [`Tree`] by walking `table`'s symbols in canonical order and
/// incrementally calling [`Tree::add_symbol`]/[`Tree::advance`] — the same
/// sequence a streaming precode parser drives one RLE run at a time.
pub fn build_tree_from_lengths(table: &LengthTable) -> Option<Tree> {
    if !table.is_valid() {
        return None;
    }
    let mut tree = Tree::new();
    let mut cursor = tree.cursor();
    let mut first = true;
    for (sym, len) in table.iter_canonical() {
        if !first && !tree.advance(&mut cursor) {
            return None;
        }
        if !tree.add_symbol(&mut cursor, sym, len as u32) {
            return None;
        }
        first = false;
    }
    Some(tree)
}

pub fn default_litlen_tree() -> Tree {
    let mut table = LengthTable::new();
    table.make_default_literals();
    build_tree_from_lengths(&table).expect("fixed literal/length table is always valid")
}

pub fn default_distance_tree() -> Tree {
    let mut table = LengthTable::new();
    table.make_default_distances();
    build_tree_from_lengths(&table).expect("fixed distance table is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_all_zero_table() {
        let table = LengthTable::new();
        assert!(!table.is_valid());
        assert!(build_tree_from_lengths(&table).is_none());
    }

    #[test]
    fn default_literals_cover_all_symbols() {
        let mut table = LengthTable::new();
        table.make_default_literals();
        let symbols: Vec<_> = table.iter_canonical().map(|(s, _)| s).collect();
        assert_eq!(symbols.len(), 288);
    }

    #[test]
    fn fixed_litlen_tree_assigns_every_symbol_once() {
        let tree = default_litlen_tree();
        let assigned = tree.iterate();
        assert_eq!(assigned.len(), 288);
        let mut lens = std::collections::HashMap::new();
        for (sym, len) in assigned {
            lens.insert(sym, len);
        }
        assert_eq!(lens[&0u16], 8);
        assert_eq!(lens[&143u16], 8);
        assert_eq!(lens[&144u16], 9);
        assert_eq!(lens[&255u16], 9);
        assert_eq!(lens[&256u16], 7);
        assert_eq!(lens[&279u16], 7);
        assert_eq!(lens[&280u16], 8);
        assert_eq!(lens[&287u16], 8);
    }

    #[test]
    fn nonmonotonic_length_is_rejected() {
        let mut tree = Tree::new();
        let mut cursor = tree.cursor();
        // the root starts uncommitted, so the first symbol is free to pick
        // any length; here it commits the top-level node to 3 bits.
        assert!(tree.add_symbol(&mut cursor, 0, 3));
        assert!(tree.advance(&mut cursor));
        // a length shorter than the already-committed depth must fail
        assert!(!tree.add_symbol(&mut cursor, 1, 2));
    }

    #[test]
    fn decodes_symbol_shorter_than_root_width() {
        // regression: a table whose minimum length is small must not be
        // rejected just because later symbols commit a wider root node.
        let mut table = LengthTable::new();
        table.add_symbol(0, 1);
        table.add_symbol(1, 2);
        table.add_symbol(2, 2);
        let tree = build_tree_from_lengths(&table).expect("valid table");
        let assigned = tree.iterate();
        assert_eq!(assigned.len(), 3);
        let lens: std::collections::HashMap<_, _> = assigned.into_iter().collect();
        assert_eq!(lens[&0u16], 1);
        assert_eq!(lens[&1u16], 2);
        assert_eq!(lens[&2u16], 2);
    }
}
