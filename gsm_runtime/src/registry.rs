use std::collections::BTreeMap;

use log::debug;

use crate::{RuntimeError, RuntimeResult, SharedArray, SharedScalar};

/// One live shared abstraction, owned exclusively by the registry.
pub enum Abstraction {
    Array(SharedArray),
    Scalar(SharedScalar),
}

impl Abstraction {
    fn span_bytes(&self) -> usize {
        match self {
            Abstraction::Array(array) => array.span_bytes(),
            Abstraction::Scalar(scalar) => scalar.ty().size_in_bytes(),
        }
    }
}

struct Entry {
    serial: u64,
    abs: Abstraction,
}

enum Located {
    Base(u64),
    /// Address falls strictly inside an abstraction's logical span; carries
    /// the interior element offset.
    Interior(u64, usize),
}

/// Owner of all live abstractions, keyed by externally visible base address.
///
/// Entries appear on allocation and disappear on free; removal is the single
/// teardown path (dropping the abstraction frees its window, collectively).
/// Looking up a stale address afterwards is a usage violation.
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<u64, Entry>,
    next_serial: u64,
}

impl Registry {
    /// Register a freshly created abstraction under its base address.
    pub fn insert(&mut self, abs: Abstraction) -> u64 {
        let addr = match &abs {
            Abstraction::Array(array) => array.base_addr(),
            Abstraction::Scalar(scalar) => scalar.base_addr(),
        };
        let serial = self.next_serial;
        self.next_serial += 1;
        self.entries.insert(addr, Entry { serial, abs });
        debug!("registered abstraction {addr:#x} (serial {serial})");
        addr
    }

    pub fn get(&self, addr: u64) -> RuntimeResult<&Abstraction> {
        self.entries
            .get(&addr)
            .map(|entry| &entry.abs)
            .ok_or(RuntimeError::UnknownAddress(addr))
    }

    pub fn get_mut(&mut self, addr: u64) -> RuntimeResult<&mut Abstraction> {
        self.entries
            .get_mut(&addr)
            .map(|entry| &mut entry.abs)
            .ok_or(RuntimeError::UnknownAddress(addr))
    }

    pub fn array(&self, addr: u64) -> RuntimeResult<&SharedArray> {
        match self.get(addr)? {
            Abstraction::Array(array) => Ok(array),
            Abstraction::Scalar(_) => Err(RuntimeError::NotAnArray(addr)),
        }
    }

    pub fn array_mut(&mut self, addr: u64) -> RuntimeResult<&mut SharedArray> {
        match self.get_mut(addr)? {
            Abstraction::Array(array) => Ok(array),
            Abstraction::Scalar(_) => Err(RuntimeError::NotAnArray(addr)),
        }
    }

    pub fn scalar_mut(&mut self, addr: u64) -> RuntimeResult<&mut SharedScalar> {
        match self.get_mut(addr)? {
            Abstraction::Scalar(scalar) => Ok(scalar),
            Abstraction::Array(_) => Err(RuntimeError::NotAScalar(addr)),
        }
    }

    pub fn scalar(&self, addr: u64) -> RuntimeResult<&SharedScalar> {
        match self.get(addr)? {
            Abstraction::Scalar(scalar) => Ok(scalar),
            Abstraction::Array(_) => Err(RuntimeError::NotAScalar(addr)),
        }
    }

    /// Remove and return an abstraction; the caller drops it, which is the
    /// only place its window is freed.
    pub fn remove(&mut self, addr: u64) -> RuntimeResult<Abstraction> {
        self.entries
            .remove(&addr)
            .map(|entry| entry.abs)
            .ok_or(RuntimeError::UnknownAddress(addr))
    }

    /// Drain every abstraction in creation order. Window frees are
    /// collective, so teardown must visit them in the same order on every
    /// rank; creation order is that order under the SPMD model.
    pub fn drain_in_creation_order(&mut self) -> Vec<Abstraction> {
        let mut entries: Vec<Entry> = std::mem::take(&mut self.entries)
            .into_values()
            .collect();
        entries.sort_by_key(|entry| entry.serial);
        entries.into_iter().map(|entry| entry.abs).collect()
    }

    fn locate(&self, addr: u64) -> Option<Located> {
        let (&base, entry) = self.entries.range(..=addr).next_back()?;
        if base == addr {
            return Some(Located::Base(base));
        }
        let span = entry.abs.span_bytes() as u64;
        if addr < base + span {
            if let Abstraction::Array(array) = &entry.abs {
                let elem = (addr - base) as usize / array.ty().size_in_bytes();
                return Some(Located::Interior(base, elem));
            }
        }
        None
    }

    /// Resolve a multi-index access down to one (abstraction, linear index)
    /// pair.
    ///
    /// The nested layout is probed first: a stored pointer that is the base
    /// of a registered pointer-bearing abstraction continues the walk with a
    /// fresh offset. A pointer landing strictly inside a registered span is
    /// the flattened layout; its interior element offset is the
    /// already-flattened index prefix. When the landed buffer has no pointer
    /// mirror of its own and more than one index remains, the walk switches
    /// to the algebraic fold in [`Self::fold_flattened`]. A pointer matching
    /// neither is fatal (use-after-free or an unsupported layout).
    pub fn resolve(&self, addr: u64, indices: &[i64]) -> RuntimeResult<(u64, usize)> {
        let mut base = addr;
        let mut carry: usize = 0;
        // Top-level misuse gets the clearer unknown-address diagnostic.
        self.get(addr)?;
        let (walk, last) = match indices {
            [] => {
                return Err(RuntimeError::OffsetOutOfRange {
                    addr,
                    index: 0,
                })
            }
            [walk @ .., last] => (walk, *last),
        };
        for (level, &index) in walk.iter().enumerate() {
            let array = self.array(base)?;
            let slot = checked_index(array, carry, index)?;
            let ptr = array.pointer_at(slot)?;
            // Indices left after this dereference, including `last`.
            let remaining = indices.len() - level - 1;
            match self.locate(ptr) {
                Some(Located::Base(next)) => {
                    if remaining == 1 || self.array(next)?.has_pointers() {
                        base = next;
                        carry = 0;
                    } else {
                        return self.fold_flattened(base, next, 0, &indices[level + 1..]);
                    }
                }
                Some(Located::Interior(next, elem)) => {
                    if remaining == 1 || self.array(next)?.has_pointers() {
                        base = next;
                        carry = elem;
                    } else {
                        return self.fold_flattened(base, next, elem, &indices[level + 1..]);
                    }
                }
                None => return Err(RuntimeError::Unresolvable(ptr)),
            }
        }
        let array = self.array(base)?;
        let linear = checked_index(array, carry, last)?;
        Ok((base, linear))
    }

    /// Fold the remaining indices of a flattened access algebraically.
    ///
    /// `carry` is the interior element offset the dereferenced pointer landed
    /// on inside `innermost`; it already positions the slab the consumed
    /// index prefix selects. Each remaining index then advances by the
    /// product of the extents of the deeper dimensions. The extents are
    /// harvested by walking the first stored pointer at each level starting
    /// from `level`, the array whose pointer triggered the switch: a
    /// registered sub-abstraction contributes its element count, and once the
    /// walk reaches `innermost` itself the spacing between that level's
    /// consecutive pointers gives the innermost row length. A layout whose
    /// first row does not materialize enough levels to cover every remaining
    /// dimension is unresolvable.
    fn fold_flattened(
        &self,
        level: u64,
        innermost: u64,
        carry: usize,
        rest: &[i64],
    ) -> RuntimeResult<(u64, usize)> {
        let target = self.array(innermost)?;
        let es = target.ty().size_in_bytes() as u64;

        let mut extents: Vec<usize> = Vec::with_capacity(rest.len());
        let mut cur = self.array(level)?;
        while extents.len() < rest.len() {
            let first = cur
                .first_pointer()
                .ok_or(RuntimeError::Unresolvable(cur.base_addr()))?;
            match self.locate(first) {
                Some(Located::Base(next)) if next != innermost => {
                    let sub = self.array(next)?;
                    extents.push(sub.elems());
                    if sub.has_pointers() {
                        cur = sub;
                    } else if extents.len() < rest.len() {
                        // nested leaf with dimensions still unaccounted for
                        return Err(RuntimeError::Unresolvable(next));
                    }
                }
                Some(Located::Base(_)) | Some(Located::Interior(..)) => {
                    // The walk reached the flat buffer; the only extent still
                    // derivable is this level's row length, so every deeper
                    // dimension must already be covered.
                    if extents.len() + 1 < rest.len() {
                        return Err(RuntimeError::Unresolvable(first));
                    }
                    let spacing = cur
                        .pointer_spacing()
                        .filter(|spacing| *spacing > 0 && *spacing % es == 0)
                        .ok_or(RuntimeError::Unresolvable(first))?;
                    extents.push((spacing / es) as usize);
                }
                None => return Err(RuntimeError::Unresolvable(first)),
            }
        }

        let mut linear = carry;
        for (pos, &index) in rest.iter().enumerate() {
            if index < 0 {
                return Err(RuntimeError::OffsetOutOfRange {
                    addr: level,
                    index,
                });
            }
            let stride: usize = extents[pos + 1..].iter().product();
            linear += index as usize * stride;
        }
        if linear >= target.elems() {
            return Err(RuntimeError::OffsetOutOfRange {
                addr: innermost,
                index: linear as i64,
            });
        }
        Ok((innermost, linear))
    }
}

fn checked_index(array: &SharedArray, carry: usize, index: i64) -> RuntimeResult<usize> {
    let addr = array.base_addr();
    if index < 0 {
        return Err(RuntimeError::OffsetOutOfRange { addr, index });
    }
    let slot = carry + index as usize;
    if slot >= array.elems() {
        return Err(RuntimeError::OffsetOutOfRange {
            addr,
            index: slot as i64,
        });
    }
    Ok(slot)
}
