//! Container template instantiation
//!
//! Every distinct `List[T]` and `Dict[K,V]` in the program becomes one
//! expansion of the runtime's `__LANG_RT_LIST_DEFINE` /
//! `__LANG_RT_DICT_DEFINE` macro, parameterized with drop/clone macros
//! chosen by the element type's kind. Instantiations are ordered inner
//! before outer so nested containers compile, and every `Dict[K,V]` forces
//! `List[K]` so `keys()` has a list type to return. Tag names come from
//! [`Ty::tag`], so emission is deterministic.

use crate::codegen::{c_type, release_lines, retain_lines, CodeGen};
use crate::typeck::Ty;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Entry {
    List(Ty),
    Dict(Ty, Ty),
}

impl<'a> CodeGen<'a> {
    pub(super) fn emit_fn_typedefs(&mut self) {
        if self.used_fns.is_empty() {
            return;
        }
        self.w("// ---- function pointer typedefs ----");
        let fns: Vec<Ty> = self.used_fns.iter().cloned().collect();
        for fn_ty in fns {
            if let Ty::Fn(params, ret) = &fn_ty {
                let td = fn_ty.tag();
                let ret_c = c_type(ret);
                let params_c = if params.is_empty() {
                    "void".to_string()
                } else {
                    params.iter().map(c_type).collect::<Vec<_>>().join(", ")
                };
                self.w(format!("typedef {} (*{})({});", ret_c, td, params_c));
            }
        }
        self.w("");
    }

    /// Emit the typedef for one tuple shape (dependencies first).
    pub(super) fn emit_tuple_typedef(&mut self, elems: &[Ty]) {
        if self.emitted_tuples.contains(elems) {
            return;
        }
        for et in elems {
            if let Ty::Tuple(inner) = et {
                self.emit_tuple_typedef(inner);
            }
        }
        self.emitted_tuples.insert(elems.to_vec());
        let name = c_type(&Ty::Tuple(elems.to_vec()));
        let fields: Vec<String> =
            elems.iter().enumerate().map(|(i, et)| format!("{} f{}", c_type(et), i)).collect();
        self.w(format!("typedef struct {{ {}; }} {};", fields.join("; "), name));
    }

    pub(super) fn emit_tuple_typedefs(&mut self) {
        let tuples: Vec<Vec<Ty>> = self.used_tuples.iter().cloned().collect();
        let had_any = tuples.iter().any(|t| !self.emitted_tuples.contains(t));
        for elems in tuples {
            self.emit_tuple_typedef(&elems);
        }
        if had_any {
            self.w("");
        }
    }

    pub(super) fn emit_container_instantiations(&mut self) {
        // keys() support: List[K] must exist for every Dict[K,V].
        let key_lists: Vec<Ty> = self.used_dicts.iter().map(|(k, _)| k.clone()).collect();
        self.used_lists.extend(key_lists);

        // Classes referenced as element types need their retain/release
        // visible before the drop/clone macros that call them.
        let mut class_tags: BTreeSet<String> = BTreeSet::new();
        for elem in &self.used_lists {
            if let Ty::Class(n) = elem {
                class_tags.insert(n.clone());
            }
        }
        for (_, v) in &self.used_dicts {
            if let Ty::Class(n) = v {
                class_tags.insert(n.clone());
            }
        }
        if !class_tags.is_empty() {
            self.w("// ---- forward declarations for class types in containers ----");
            for tag in &class_tags {
                self.w(format!("static void __lang_rt_class_{0}_retain(__lang_rt_Class_{0}* o);", tag));
                self.w(format!("static void __lang_rt_class_{0}_release(__lang_rt_Class_{0}* o);", tag));
            }
            self.w("");
        }

        // Tuple element types must have their struct defined before the
        // containers that store them by value.
        let tuple_elems: Vec<Vec<Ty>> = self
            .used_lists
            .iter()
            .chain(self.used_dicts.iter().map(|(_, v)| v))
            .filter_map(|t| match t {
                Ty::Tuple(elems) => Some(elems.clone()),
                _ => None,
            })
            .collect();
        for elems in tuple_elems {
            self.emit_tuple_typedef(&elems);
        }

        // Topological order: inner containers before outer.
        let mut ordered: Vec<Entry> = Vec::new();
        let mut visited: BTreeSet<Entry> = BTreeSet::new();

        fn visit(entry: Entry, ordered: &mut Vec<Entry>, visited: &mut BTreeSet<Entry>) {
            if visited.contains(&entry) {
                return;
            }
            visited.insert(entry.clone());
            let inner = match &entry {
                Entry::List(elem) => elem.clone(),
                Entry::Dict(_, val) => val.clone(),
            };
            match inner {
                Ty::List(e) => visit(Entry::List(*e), ordered, visited),
                Ty::Dict(k, v) => visit(Entry::Dict(*k, *v), ordered, visited),
                _ => {}
            }
            ordered.push(entry);
        }

        let entries: Vec<Entry> = self
            .used_lists
            .iter()
            .map(|t| Entry::List(t.clone()))
            .chain(self.used_dicts.iter().map(|(k, v)| Entry::Dict(k.clone(), v.clone())))
            .collect();
        for entry in entries {
            visit(entry, &mut ordered, &mut visited);
        }

        if !ordered.is_empty() {
            self.w("// ---- container instantiations ----");
        }
        for entry in ordered {
            match entry {
                Entry::List(elem) => {
                    let tag = elem.tag();
                    let (ct, drop, clone) = drop_clone_macros(&elem, "", &tag);
                    self.w(drop);
                    self.w(clone);
                    self.w(format!(
                        "__LANG_RT_LIST_DEFINE({0}, {1}, __LANG_RT_DROP_{0}, __LANG_RT_CLONE_{0})",
                        tag, ct
                    ));
                    self.w("");
                }
                Entry::Dict(key, val) => {
                    let combined = Ty::dict_tag(&key, &val);
                    let (vct, vdrop, vclone) = drop_clone_macros(&val, "V", &combined);
                    self.w(vdrop);
                    self.w(vclone);
                    // String keys use the hashing/equality of the string
                    // template; everything else (integers, bool, enums)
                    // keys by integer value.
                    let (kct, ksuffix) = if key == Ty::Str {
                        ("__lang_rt_Str*".to_string(), "STR")
                    } else {
                        (c_type(&key), "INT")
                    };
                    let (khash, keq, kclone, kdrop, knull) = (
                        format!("__LANG_RT_KHASH_{}", ksuffix),
                        format!("__LANG_RT_KEQ_{}", ksuffix),
                        format!("__LANG_RT_KCLONE_{}", ksuffix),
                        format!("__LANG_RT_KDROP_{}", ksuffix),
                        format!("__LANG_RT_KNULL_{}", ksuffix),
                    );
                    self.w(format!(
                        "__LANG_RT_DICT_DEFINE({0}, {1}, {2}, {3}, {4}, {5}, {6}, {7}, __LANG_RT_VCLONE_{0}, __LANG_RT_VDROP_{0})",
                        combined, kct, vct, khash, keq, kclone, kdrop, knull
                    ));
                    self.w("");
                }
            }
        }

        // range() builds a __lang_rt_List_I64.
        if self.used_lists.contains(&Ty::I64) {
            self.w("#include \"rt_range.h\"");
            self.w("");
        }

        // keys() helpers, after all container instantiations.
        if !self.used_dicts.is_empty() {
            let dicts: Vec<(Ty, Ty)> = self.used_dicts.iter().cloned().collect();
            for (k, v) in dicts {
                let combined = Ty::dict_tag(&k, &v);
                self.w(format!("__LANG_RT_DICT_KEYS_DEFINE({}, {})", combined, k.tag()));
            }
            self.w("");
        }
    }
}

/// Compute the element C type plus the drop/clone macro definitions for a
/// container element. `vprefix` distinguishes dict-value macros
/// (`__LANG_RT_VDROP_...`); `name_tag` is the macro name suffix.
fn drop_clone_macros(elem: &Ty, vprefix: &str, name_tag: &str) -> (String, String, String) {
    let ct = c_type(elem);
    let drop_name = format!("__LANG_RT_{}DROP_{}", vprefix, name_tag);
    let clone_name = format!("__LANG_RT_{}CLONE_{}", vprefix, name_tag);

    let drop_body = release_lines(elem, "(x)");
    let retain_body = retain_lines(elem, "(src)");

    let drop = if drop_body.is_empty() {
        format!("#define {}(x) ((void)(x))", drop_name)
    } else {
        format!("#define {}(x) do {{ {} }} while(0)", drop_name, drop_body.join(" "))
    };
    let clone = if retain_body.is_empty() {
        format!("#define {}(dst, src) do {{ (dst) = (src); }} while(0)", clone_name)
    } else {
        format!(
            "#define {}(dst, src) do {{ (dst) = (src); {} }} while(0)",
            clone_name,
            retain_body.join(" ")
        )
    };
    (ct, drop, clone)
}
