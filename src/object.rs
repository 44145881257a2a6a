// Heap objects and the object heap itself.
//
// Every heap entity shares one concrete representation, `GcObject`, holding
// a mark bit, an intrusive `next` link (the heap's singly-linked object
// list), and a payload enum `ObjData`. This plays the role the teacher's
// generic `GCObject<T>` header/payload pairs play, but without needing
// per-kind pointer casts keyed off a type tag: Rust's enum already carries
// that tag, so `blacken`/`sweep` just match on it. Objects are heap
// allocated once via `Box::into_raw` and only ever freed by the collector
// in `gc.rs` - never by ordinary `drop`, since a live reference graph may be
// cyclic (closures capturing themselves through upvalues).

use std::ptr::NonNull;
use std::time::Instant;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
}

pub struct StringObj {
    pub hash: u32,
    pub value: Box<str>,
}

pub struct FunctionObj {
    pub arity: u8,
    // u16, not u8: up to 256 upvalues are allowed (MAX_UPVALUES in the
    // compiler), which does not fit in a u8 count.
    pub upvalue_count: u16,
    pub chunk: Chunk,
    pub name: Option<ObjRef>,
}

pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value, String>;

pub struct NativeObj {
    pub name: Box<str>,
    pub func: NativeFn,
}

pub struct ClosureObj {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

#[derive(Clone, Copy)]
pub enum UpvalueLoc {
    /// Points at a live stack slot.
    Open(usize),
    /// Holds a Value moved out of the stack.
    Closed(Value),
}

pub struct UpvalueObj {
    pub loc: UpvalueLoc,
    /// Link in the VM's open-upvalue chain, kept sorted by descending
    /// stack address. Unrelated to `GcObject::next`, which links every
    /// live object regardless of kind.
    pub open_next: Option<ObjRef>,
}

pub enum ObjData {
    Str(StringObj),
    Function(FunctionObj),
    Native(NativeObj),
    Closure(ClosureObj),
    Upvalue(UpvalueObj),
}

impl ObjData {
    pub fn kind(&self) -> ObjKind {
        match self {
            ObjData::Str(_) => ObjKind::String,
            ObjData::Function(_) => ObjKind::Function,
            ObjData::Native(_) => ObjKind::Native,
            ObjData::Closure(_) => ObjKind::Closure,
            ObjData::Upvalue(_) => ObjKind::Upvalue,
        }
    }
}

pub struct GcObject {
    pub is_marked: bool,
    pub next: Option<ObjRef>,
    pub data: ObjData,
}

/// A reference to a heap object. Equality is pointer identity, which is
/// exactly what the value model needs: since strings are interned,
/// string equality collapses to this.
#[derive(Clone, Copy)]
pub struct ObjRef(NonNull<GcObject>);

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for ObjRef {}

impl std::fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:p}", self.0.as_ptr())
    }
}

impl ObjRef {
    fn from_box(boxed: Box<GcObject>) -> Self {
        ObjRef(NonNull::new(Box::into_raw(boxed)).expect("Box pointer is never null"))
    }

    /// # Safety
    /// Callers must not hold this reference across a point where the
    /// collector could free the underlying object - i.e. never across an
    /// allocation that is not itself rooted.
    unsafe fn get<'a>(&self) -> &'a GcObject {
        unsafe { self.0.as_ref() }
    }

    unsafe fn get_mut<'a>(&mut self) -> &'a mut GcObject {
        unsafe { self.0.as_mut() }
    }
}

/// The object heap: an intrusive list of every live (or not-yet-swept)
/// object, plus the string-intern table. Owned by the VM and consulted by
/// the compiler at compile time (both allocate string/function constants).
pub struct Heap {
    objects: Option<ObjRef>,
    pub strings: Table,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub stress_gc: bool,
    start: Instant,
}

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

const DEFAULT_NEXT_GC: usize = 1024 * 1024;

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: None,
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: DEFAULT_NEXT_GC,
            stress_gc: false,
            start: Instant::now(),
        }
    }

    /// A `Heap` with stress-mode GC enabled: every allocation site reachable
    /// from `gc::maybe_collect` runs a full collection instead of waiting
    /// for `bytes_allocated` to cross `next_gc`. Exists so tests can drive
    /// the collector's mark/sweep/prune paths on ordinary small programs,
    /// which never come close to `DEFAULT_NEXT_GC` on their own.
    pub fn with_stress_gc() -> Self {
        let mut heap = Self::new();
        heap.stress_gc = true;
        heap
    }

    /// Seconds elapsed since this heap (and, in practice, the VM/process
    /// using it) was created. Backs the `clock` native.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn link(&mut self, data: ObjData, approx_size: usize) -> ObjRef {
        let obj = GcObject { is_marked: false, next: self.objects, data };
        let r = ObjRef::from_box(Box::new(obj));
        self.objects = Some(r);
        self.bytes_allocated += approx_size;
        r
    }

    pub fn alloc_function(&mut self, f: FunctionObj) -> ObjRef {
        self.link(ObjData::Function(f), std::mem::size_of::<FunctionObj>())
    }

    pub fn alloc_native(&mut self, n: NativeObj) -> ObjRef {
        self.link(ObjData::Native(n), std::mem::size_of::<NativeObj>())
    }

    pub fn alloc_closure(&mut self, c: ClosureObj) -> ObjRef {
        let size = std::mem::size_of::<ClosureObj>() + c.upvalues.len() * std::mem::size_of::<ObjRef>();
        self.link(ObjData::Closure(c), size)
    }

    pub fn alloc_upvalue(&mut self, slot: usize) -> ObjRef {
        let u = UpvalueObj { loc: UpvalueLoc::Open(slot), open_next: None };
        self.link(ObjData::Upvalue(u), std::mem::size_of::<UpvalueObj>())
    }

    /// Raw string allocation, bypassing interning. Used only by the intern
    /// path itself (`intern_string`) to build the candidate object.
    fn alloc_string_raw(&mut self, s: Box<str>, hash: u32) -> ObjRef {
        let size = std::mem::size_of::<StringObj>() + s.len();
        self.link(ObjData::Str(StringObj { hash, value: s }), size)
    }

    /// Interns `s`: if an equal string is already interned, returns it
    /// (the candidate is allocated then immediately becomes collector
    /// garbage - harmless, it is only reachable via `objects` until swept).
    /// Otherwise allocates, registers it in the intern table, and returns
    /// it. Matches the spec's two-step dance: callers that can trigger GC
    /// between interning and use (none currently - `set`/`insert` below
    /// never grow mid-insert in ways that can collect a not-yet-linked
    /// value) must otherwise root the candidate first.
    pub fn intern_string(&mut self, s: &str) -> ObjRef {
        let hash = fnv1a(s.as_bytes());
        if let Some(existing) = self.strings.find_string(s, hash, self) {
            return existing;
        }
        let obj = self.alloc_string_raw(s.into(), hash);
        let mut strings = std::mem::take(&mut self.strings);
        strings.set(Value::Obj(obj), Value::Bool(true), self);
        self.strings = strings;
        obj
    }

    pub fn all_objects(&self) -> Option<ObjRef> {
        self.objects
    }

    pub fn set_all_objects(&mut self, head: Option<ObjRef>) {
        self.objects = head;
    }

    pub fn is_marked(&self, r: ObjRef) -> bool {
        unsafe { r.get().is_marked }
    }

    pub fn mark(&mut self, r: ObjRef) -> bool {
        let already = unsafe { r.get().is_marked };
        if !already {
            unsafe {
                let mut r = r;
                r.get_mut().is_marked = true;
            }
        }
        !already
    }

    pub fn kind(&self, r: ObjRef) -> ObjKind {
        unsafe { r.get().data.kind() }
    }

    pub fn kind_name(&self, r: ObjRef) -> &'static str {
        match self.kind(r) {
            ObjKind::String => "string",
            ObjKind::Function => "function",
            ObjKind::Native => "native",
            ObjKind::Closure => "closure",
            ObjKind::Upvalue => "upvalue",
        }
    }

    pub fn hash_of(&self, r: ObjRef) -> u32 {
        let obj = unsafe { r.get() };
        match &obj.data {
            ObjData::Str(s) => s.hash,
            _ => 0,
        }
    }

    pub fn as_string(&self, r: ObjRef) -> Option<&StringObj> {
        let obj = unsafe { r.get() };
        match &obj.data {
            ObjData::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self, r: ObjRef) -> Option<&FunctionObj> {
        let obj = unsafe { r.get() };
        match &obj.data {
            ObjData::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self, mut r: ObjRef) -> Option<&mut FunctionObj> {
        let obj = unsafe { r.get_mut() };
        match &mut obj.data {
            ObjData::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_native(&self, r: ObjRef) -> Option<&NativeObj> {
        let obj = unsafe { r.get() };
        match &obj.data {
            ObjData::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_closure(&self, r: ObjRef) -> Option<&ClosureObj> {
        let obj = unsafe { r.get() };
        match &obj.data {
            ObjData::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_closure_mut(&mut self, mut r: ObjRef) -> Option<&mut ClosureObj> {
        let obj = unsafe { r.get_mut() };
        match &mut obj.data {
            ObjData::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_upvalue(&self, r: ObjRef) -> Option<&UpvalueObj> {
        let obj = unsafe { r.get() };
        match &obj.data {
            ObjData::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_upvalue_mut(&mut self, mut r: ObjRef) -> Option<&mut UpvalueObj> {
        let obj = unsafe { r.get_mut() };
        match &mut obj.data {
            ObjData::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn format_obj(&self, r: ObjRef) -> String {
        let obj = unsafe { r.get() };
        match &obj.data {
            ObjData::Str(s) => s.value.to_string(),
            ObjData::Function(f) => match f.name {
                Some(n) => format!("<fn {}>", self.as_string(n).unwrap().value),
                None => "<script>".to_string(),
            },
            ObjData::Native(n) => format!("<native fn {}>", n.name),
            ObjData::Closure(c) => self.format_obj(c.function),
            ObjData::Upvalue(_) => "<upvalue>".to_string(),
        }
    }

    pub fn callable_name(&self, r: ObjRef) -> String {
        match self.kind(r) {
            ObjKind::Closure => {
                let f = self.as_closure(r).unwrap().function;
                self.function_display_name(f)
            }
            ObjKind::Function => self.function_display_name(r),
            ObjKind::Native => self.as_native(r).unwrap().name.to_string(),
            _ => "script".to_string(),
        }
    }

    fn function_display_name(&self, f: ObjRef) -> String {
        match self.as_function(f).unwrap().name {
            Some(n) => format!("{}()", self.as_string(n).unwrap().value),
            None => "script".to_string(),
        }
    }

    /// Frees `r` immediately, without unlinking it from `objects` -
    /// callers (the sweeper) are responsible for list maintenance. Strings
    /// are not un-interned here; the weak-key pass in `gc.rs` already ran.
    ///
    /// # Safety
    /// `r` must not be reachable from any remaining root or object.
    pub unsafe fn free(&mut self, r: ObjRef) {
        let size = unsafe { approx_size(&r.get().data) };
        self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
        drop(unsafe { Box::from_raw(r.0.as_ptr()) });
    }

    pub fn next_of(&self, r: ObjRef) -> Option<ObjRef> {
        unsafe { r.get().next }
    }

    pub fn set_next(&mut self, mut r: ObjRef, next: Option<ObjRef>) {
        unsafe { r.get_mut().next = next };
    }

    pub fn clear_mark(&mut self, mut r: ObjRef) {
        unsafe { r.get_mut().is_marked = false };
    }

    /// Weak-key pass over the intern table: drops entries whose key string
    /// was not marked this cycle. Must run after mark, before sweep.
    pub fn prune_interned_strings(&mut self) {
        let mut strings = std::mem::take(&mut self.strings);
        strings.remove_unmarked_keys(self);
        self.strings = strings;
    }
}

fn approx_size(data: &ObjData) -> usize {
    match data {
        ObjData::Str(s) => std::mem::size_of::<StringObj>() + s.value.len(),
        ObjData::Function(_) => std::mem::size_of::<FunctionObj>(),
        ObjData::Native(_) => std::mem::size_of::<NativeObj>(),
        ObjData::Closure(c) => {
            std::mem::size_of::<ClosureObj>() + c.upvalues.len() * std::mem::size_of::<ObjRef>()
        }
        ObjData::Upvalue(_) => std::mem::size_of::<UpvalueObj>(),
    }
}
