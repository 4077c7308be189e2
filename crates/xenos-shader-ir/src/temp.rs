use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::ir::{Dst, Lane, Operand, Swizzle, WriteMask};

/// Temporary register pool shared between a [`crate::ShaderBuilder`] and its live [`Temp`]s.
#[derive(Default)]
pub(crate) struct TempPool {
    in_use: RefCell<Vec<bool>>,
    high_water: Cell<u32>,
}

impl TempPool {
    pub(crate) fn acquire(self: &Rc<Self>) -> Temp {
        let mut in_use = self.in_use.borrow_mut();
        let index = match in_use.iter().position(|used| !used) {
            Some(free) => {
                in_use[free] = true;
                free
            }
            None => {
                in_use.push(true);
                in_use.len() - 1
            }
        };
        let index = index as u32;
        self.high_water.set(self.high_water.get().max(index + 1));
        Temp {
            index,
            pool: Rc::clone(self),
        }
    }

    fn release(&self, index: u32) {
        if let Some(slot) = self.in_use.borrow_mut().get_mut(index as usize) {
            *slot = false;
        }
    }

    pub(crate) fn high_water(&self) -> u32 {
        self.high_water.get()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.in_use.borrow().iter().filter(|used| **used).count()
    }
}

/// Scoped temporary register. The register returns to the pool when the handle is dropped, so
/// the lowest free index is reused by the next allocation.
pub struct Temp {
    index: u32,
    pool: Rc<TempPool>,
}

impl Temp {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn op(&self) -> Operand {
        Operand::temp(self.index, Swizzle::XYZW)
    }

    pub fn swz(&self, swizzle: Swizzle) -> Operand {
        Operand::temp(self.index, swizzle)
    }

    pub fn lane(&self, lane: Lane) -> Operand {
        Operand::temp(self.index, Swizzle::splat(lane))
    }

    pub fn x(&self) -> Operand {
        self.lane(Lane::X)
    }

    pub fn y(&self) -> Operand {
        self.lane(Lane::Y)
    }

    pub fn z(&self) -> Operand {
        self.lane(Lane::Z)
    }

    pub fn w(&self) -> Operand {
        self.lane(Lane::W)
    }

    pub fn dst(&self, mask: WriteMask) -> Dst {
        Dst {
            temp: self.index,
            mask,
        }
    }

    pub fn dst_lane(&self, lane: Lane) -> Dst {
        self.dst(lane.mask())
    }

    pub fn dst_x(&self) -> Dst {
        self.dst(WriteMask::X)
    }

    pub fn dst_y(&self) -> Dst {
        self.dst(WriteMask::Y)
    }

    pub fn dst_z(&self) -> Dst {
        self.dst(WriteMask::Z)
    }

    pub fn dst_w(&self) -> Dst {
        self.dst(WriteMask::W)
    }

    pub fn dst_all(&self) -> Dst {
        self.dst(WriteMask::XYZW)
    }
}

impl Drop for Temp {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

impl fmt::Debug for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.index)
    }
}
