//! Assembler: lowers parsed `.sbs` files into a module image
//!
//! Diagnostic codes:
//! - `SB0001` lexical error, `SB0002` syntax error
//! - `SB0026` `this` used in a static method
//! - `SB0029` initializer does not fit the declared type
//! - `SB0101` duplicate type, `SB0103` duplicate member, `SB0128` duplicate local
//! - `SB0140` duplicate label, `SB0500` undefined label
//! - `SB0120` instance member used from a static method
//! - `SB0227` unsafe import without unsafe code enabled
//! - `SB0235` too many parameters or locals for the image format
//! - `SB0246` unresolved type, member, local or import library
//! - `SB0400` `yield` outside a sequence method
//! - `SB0527` more than one base type
//! - `SB1501` argument count mismatch
//! - `SB1517`/`SB1027`/`SB1028` preprocessor errors
//! - `SB0168` (warning) unused local, `SB1701` (warning) duplicate reference
//! - `SB0001H` (hidden) unused import

use super::lexer::{preprocess, tokenize};
use super::parser::{self, ImportDecl, MethodDecl, Operand, Pos, SourceFile, Stmt, TypeDecl};
use super::{CompileOptions, CompileOutput, CompilerService, Diagnostic, Reference, Severity, SourceText};
use crate::image::{
    encode_code, flags, qualify, EventDef, FieldDef, ImportDef, Instr, LineEntry, MethodDef,
    MethodSymbols, ModuleImage, Opcode, ParamDef, PropertyDef, ReplaceInfo, SymbolImage, TypeDef,
    TypeKind,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// Compiler service for the `.sbs` assembler language
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblerCompiler;

impl AssemblerCompiler {
    /// Create the compiler
    pub fn new() -> Self {
        Self
    }
}

impl CompilerService for AssemblerCompiler {
    fn name(&self) -> &str {
        "sbs-assembler"
    }

    fn compile(
        &self,
        sources: &[SourceText],
        references: &[Reference],
        options: &CompileOptions,
    ) -> CompileOutput {
        let mut diagnostics = Vec::new();
        let mut files = Vec::with_capacity(sources.len());

        for source in sources {
            let (text, pre) = preprocess(&source.text, &source.path, &options.define_symbols);
            let (tokens, lex) = tokenize(&text, &source.path);
            let (file, parse) = parser::parse(tokens, &source.path);
            diagnostics.extend(pre);
            diagnostics.extend(lex);
            diagnostics.extend(parse);
            files.push(file);
        }

        let mut seen = FxHashSet::default();
        for reference in references {
            if !seen.insert(reference.name.as_str()) {
                diagnostics.push(Diagnostic::warning(
                    "SB1701",
                    1,
                    format!(
                        "assuming reference '{}' matches an earlier reference of the same name",
                        reference.name
                    ),
                ));
            }
        }

        let mut assembler = Assembler::new(options, references);
        assembler.declare(files);
        assembler.lower();
        let Assembler {
            image,
            symbols,
            diagnostics: lowered,
            ..
        } = assembler;
        diagnostics.extend(lowered);

        diagnostics.retain(|d| {
            d.severity != Severity::Warning || d.warning_level <= options.warning_level
        });

        let success = !diagnostics.iter().any(Diagnostic::is_error);
        let (image, symbols) = if success {
            let symbol_bytes = options.generate_symbols.then(|| symbols.encode());
            (Some(image.encode()), symbol_bytes)
        } else {
            (None, None)
        };

        CompileOutput {
            success,
            diagnostics,
            image,
            symbols,
        }
    }
}

struct TypeEntry {
    decl: TypeDecl,
    full_name: String,
    file: usize,
    index: usize,
}

struct FileImport {
    index: u32,
    param_count: u8,
    pos: Pos,
}

struct Assembler<'a> {
    options: &'a CompileOptions,
    references: &'a [Reference],
    image: ModuleImage,
    symbols: SymbolImage,
    diagnostics: Vec<Diagnostic>,
    types: Vec<TypeEntry>,
    by_name: FxHashMap<String, usize>,
    file_imports: Vec<FxHashMap<String, FileImport>>,
    used_imports: FxHashSet<(usize, String)>,
}

impl<'a> Assembler<'a> {
    fn new(options: &'a CompileOptions, references: &'a [Reference]) -> Self {
        let mut image = ModuleImage::new(options.module_name.clone());
        if options.runtime_compiled {
            image.flags |= flags::RUNTIME_COMPILED;
        }
        if options.generate_symbols {
            image.flags |= flags::HAS_SYMBOLS;
        }
        Self {
            options,
            references,
            image,
            symbols: SymbolImage::new(),
            diagnostics: Vec::new(),
            types: Vec::new(),
            by_name: FxHashMap::default(),
            file_imports: Vec::new(),
            used_imports: FxHashSet::default(),
        }
    }

    fn file_path(&self, file: usize) -> &str {
        self.symbols
            .source_files
            .get(file)
            .map(String::as_str)
            .unwrap_or("")
    }

    fn error(&mut self, file: usize, pos: Pos, code: &str, message: impl Into<String>) {
        let d = Diagnostic::error(code, message).at(self.file_path(file), pos.line, pos.column);
        self.diagnostics.push(d);
    }

    fn emit(&mut self, file: usize, pos: Pos, diagnostic: Diagnostic) {
        let d = diagnostic.at(self.file_path(file), pos.line, pos.column);
        self.diagnostics.push(d);
    }

    // ------------------------------------------------------------------
    // Declaration pass
    // ------------------------------------------------------------------

    fn declare(&mut self, files: Vec<SourceFile>) {
        for (file_idx, file) in files.into_iter().enumerate() {
            self.symbols.source_files.push(file.path.clone());
            self.file_imports.push(FxHashMap::default());
            for import in &file.imports {
                self.declare_import(file_idx, import);
            }
            for ty in file.types {
                self.declare_type(ty, None, file_idx);
            }
        }
    }

    fn declare_import(&mut self, file: usize, import: &ImportDecl) {
        let (type_path, member) = match import.path.rsplit_once('.') {
            Some(split) => split,
            None => return,
        };
        let (namespace, type_name) = type_path.rsplit_once('.').unwrap_or(("", type_path));

        if import.is_unsafe && !self.options.allow_unsafe {
            self.error(
                file,
                import.pos,
                "SB0227",
                format!("unsafe import '{}' requires unsafe code to be enabled", import.path),
            );
        }

        let references = self.references;
        match references.iter().find(|r| r.name == import.library) {
            None => self.error(
                file,
                import.pos,
                "SB0246",
                format!(
                    "library '{}' could not be found (are you missing a reference?)",
                    import.library
                ),
            ),
            Some(reference) => match reference.find_type(type_path) {
                None => self.error(
                    file,
                    import.pos,
                    "SB0246",
                    format!("type '{}' does not exist in library '{}'", type_path, import.library),
                ),
                Some(exported) => match exported.members.iter().find(|m| m.name == member) {
                    None => self.error(
                        file,
                        import.pos,
                        "SB0246",
                        format!("'{}' does not contain a definition for '{}'", type_path, member),
                    ),
                    Some(m) if m.param_count.is_some_and(|n| n != import.param_count) => self.error(
                        file,
                        import.pos,
                        "SB1501",
                        format!(
                            "no overload for '{}' takes {} argument(s)",
                            import.path, import.param_count
                        ),
                    ),
                    Some(_) => {}
                },
            },
        }

        let def = ImportDef {
            library: import.library.clone(),
            namespace: namespace.to_string(),
            type_name: type_name.to_string(),
            member: member.to_string(),
            param_count: import.param_count,
            is_unsafe: import.is_unsafe,
        };
        if def.is_unsafe && self.options.allow_unsafe {
            self.image.flags |= flags::ALLOW_UNSAFE;
        }
        let index = match self.image.imports.iter().position(|existing| *existing == def) {
            Some(idx) => idx as u32,
            None => {
                self.image.imports.push(def);
                (self.image.imports.len() - 1) as u32
            }
        };

        if self.file_imports[file].contains_key(&import.path) {
            self.error(
                file,
                import.pos,
                "SB0103",
                format!("'{}' is imported more than once", import.path),
            );
            return;
        }
        self.file_imports[file].insert(
            import.path.clone(),
            FileImport {
                index,
                param_count: import.param_count,
                pos: import.pos,
            },
        );
    }

    fn declare_type(&mut self, mut decl: TypeDecl, parent: Option<(u32, String)>, file: usize) {
        let nested = std::mem::take(&mut decl.nested);
        let simple = match &parent {
            Some((_, outer)) => format!("{}.{}", outer, decl.name),
            None => decl.name.clone(),
        };
        let full_name = qualify(&decl.namespace, &simple);

        if self.by_name.contains_key(&full_name) {
            self.error(
                file,
                decl.pos,
                "SB0101",
                format!("the module already contains a definition for '{}'", full_name),
            );
            return;
        }

        let index = self.image.types.len();
        self.image.types.push(TypeDef {
            namespace: decl.namespace.clone(),
            name: simple.clone(),
            kind: decl.kind,
            is_public: decl.is_public,
            attributes: decl.attributes.clone(),
            parent: parent.as_ref().map(|(idx, _)| *idx),
            ..TypeDef::default()
        });
        self.by_name.insert(full_name.clone(), self.types.len());
        self.types.push(TypeEntry {
            decl,
            full_name,
            file,
            index,
        });

        for inner in nested {
            self.declare_type(inner, Some((index as u32, simple.clone())), file);
        }
    }

    // ------------------------------------------------------------------
    // Lowering pass
    // ------------------------------------------------------------------

    fn resolve_type(&self, name: &str, namespace: &str) -> Option<(String, TypeKind)> {
        let candidates = [qualify(namespace, name), name.to_string()];
        for candidate in &candidates {
            if let Some(&entry) = self.by_name.get(candidate) {
                return Some((candidate.clone(), self.types[entry].decl.kind));
            }
        }
        for candidate in &candidates {
            for reference in self.references {
                if let Some(exported) = reference.find_type(candidate) {
                    return Some((candidate.clone(), exported.kind));
                }
            }
        }
        None
    }

    fn lower(&mut self) {
        for entry in 0..self.types.len() {
            self.lower_type(entry);
        }

        let mut unused = Vec::new();
        for (file, imports) in self.file_imports.iter().enumerate() {
            for (path, import) in imports {
                if !self.used_imports.contains(&(file, path.clone())) {
                    unused.push((file, import.pos, path.clone()));
                }
            }
        }
        for (file, pos, path) in unused {
            self.emit(
                file,
                pos,
                Diagnostic::hidden("SB0001H", format!("unnecessary import '{}'", path)),
            );
        }
    }

    fn lower_type(&mut self, entry: usize) {
        let decl = self.types[entry].decl.clone();
        let file = self.types[entry].file;
        let index = self.types[entry].index;
        let full_name = self.types[entry].full_name.clone();

        let mut base = None;
        let mut interfaces = Vec::new();
        for (name, pos) in &decl.supertypes {
            match self.resolve_type(name, &decl.namespace) {
                None => self.error(
                    file,
                    *pos,
                    "SB0246",
                    format!("the type or namespace name '{}' could not be found", name),
                ),
                Some((resolved, _)) if resolved == full_name => self.error(
                    file,
                    *pos,
                    "SB0246",
                    format!("'{}' cannot derive from itself", full_name),
                ),
                Some((resolved, TypeKind::Interface)) => interfaces.push(resolved),
                Some((resolved, _)) if decl.kind == TypeKind::Interface => self.error(
                    file,
                    *pos,
                    "SB0527",
                    format!("'{}' in interface list is not an interface", resolved),
                ),
                Some((resolved, _)) if base.is_some() => self.error(
                    file,
                    *pos,
                    "SB0527",
                    format!("'{}' cannot have multiple base types ('{}')", full_name, resolved),
                ),
                Some((resolved, _)) => base = Some(resolved),
            }
        }

        let replace = decl.replace.as_ref().map(|info| ReplaceInfo {
            replace_name: info.replace_name.clone(),
            require_base: info.require_base.as_ref().map(|name| {
                self.resolve_type(name, &decl.namespace)
                    .map_or_else(|| name.clone(), |(resolved, _)| resolved)
            }),
            require_interfaces: info
                .require_interfaces
                .iter()
                .map(|name| {
                    self.resolve_type(name, &decl.namespace)
                        .map_or_else(|| name.clone(), |(resolved, _)| resolved)
                })
                .collect(),
        });

        let fields = self.lower_fields(&decl, file);
        let events = self.lower_events(&decl, file);

        let mut methods = Vec::new();
        let mut seen = FxHashSet::default();
        for method in &decl.methods {
            if !seen.insert((method.name.clone(), method.is_static)) {
                self.error(
                    file,
                    method.pos,
                    "SB0103",
                    format!("'{}' already defines a method named '{}'", full_name, method.name),
                );
                continue;
            }
            let Some(local_count) = frame_size(method) else {
                self.error(
                    file,
                    method.pos,
                    "SB0235",
                    format!(
                        "'{}.{}' has {} parameters and {} locals; at most {} parameters and {} slots fit",
                        full_name,
                        method.name,
                        method.params.len(),
                        method.locals.len(),
                        u8::MAX,
                        u16::MAX
                    ),
                );
                continue;
            };
            let (code, lines) = self.lower_body(&decl, method, file);
            self.symbols.methods.push(MethodSymbols {
                type_index: index as u32,
                method_index: methods.len() as u32,
                source_file: file as u32,
                lines,
            });
            methods.push(MethodDef {
                name: method.name.clone(),
                is_static: method.is_static,
                is_sequence: method.is_sequence,
                params: method
                    .params
                    .iter()
                    .map(|(name, ty)| ParamDef {
                        name: name.clone(),
                        ty: *ty,
                    })
                    .collect(),
                returns: method.returns,
                local_count,
                code: encode_code(&code),
            });
        }

        let properties = self.lower_properties(&decl, file);

        let ty = &mut self.image.types[index];
        ty.base = base;
        ty.interfaces = interfaces;
        ty.replace = replace;
        ty.fields = fields;
        ty.properties = properties;
        ty.methods = methods;
        ty.events = events;
    }

    fn lower_fields(&mut self, decl: &TypeDecl, file: usize) -> Vec<FieldDef> {
        let mut fields: Vec<FieldDef> = Vec::new();
        for field in &decl.fields {
            let is_static = field.flags & crate::image::field_flags::STATIC != 0;
            if fields
                .iter()
                .any(|f| f.name == field.name && f.is_static() == is_static)
            {
                self.error(
                    file,
                    field.pos,
                    "SB0103",
                    format!("'{}' already defines a field named '{}'", decl.name, field.name),
                );
                continue;
            }
            let default = match &field.default {
                None => field.ty.zero(),
                Some(literal) => match field.ty.coerce(literal.clone()) {
                    Some(v) => v,
                    None => {
                        self.error(
                            file,
                            field.pos,
                            "SB0029",
                            format!(
                                "cannot convert {} literal to '{}'",
                                literal.value_type(),
                                field.ty.name()
                            ),
                        );
                        field.ty.zero()
                    }
                },
            };
            fields.push(FieldDef {
                name: field.name.clone(),
                ty: field.ty,
                flags: field.flags,
                default,
            });
        }
        fields
    }

    fn lower_events(&mut self, decl: &TypeDecl, file: usize) -> Vec<EventDef> {
        let mut events: Vec<EventDef> = Vec::new();
        for event in &decl.events {
            if events.iter().any(|e| e.name == event.name) {
                self.error(
                    file,
                    event.pos,
                    "SB0103",
                    format!("'{}' already defines an event named '{}'", decl.name, event.name),
                );
                continue;
            }
            events.push(EventDef {
                name: event.name.clone(),
                is_static: event.is_static,
            });
        }
        events
    }

    fn lower_properties(&mut self, decl: &TypeDecl, file: usize) -> Vec<PropertyDef> {
        let mut properties: Vec<PropertyDef> = Vec::new();
        for prop in &decl.properties {
            if properties
                .iter()
                .any(|p| p.name == prop.name && p.is_static == prop.is_static)
            {
                self.error(
                    file,
                    prop.pos,
                    "SB0103",
                    format!("'{}' already defines a property named '{}'", decl.name, prop.name),
                );
                continue;
            }
            let accessors = [(&prop.getter, 0usize), (&prop.setter, 1usize)];
            for (accessor, params) in accessors {
                if let Some(name) = accessor {
                    let found = decl.methods.iter().any(|m| {
                        &m.name == name && m.is_static == prop.is_static && m.params.len() == params
                    });
                    if !found {
                        self.error(
                            file,
                            prop.pos,
                            "SB0246",
                            format!(
                                "accessor '{}' of property '{}' must be a {}method taking {} argument(s)",
                                name,
                                prop.name,
                                if prop.is_static { "static " } else { "" },
                                params
                            ),
                        );
                    }
                }
            }
            properties.push(PropertyDef {
                name: prop.name.clone(),
                ty: prop.ty,
                is_static: prop.is_static,
                getter: prop.getter.clone(),
                setter: prop.setter.clone(),
            });
        }
        properties
    }

    fn lower_body(&mut self, decl: &TypeDecl, method: &MethodDecl, file: usize) -> (Vec<Instr>, Vec<LineEntry>) {
        // Slots: parameters first, then locals; `frame_size` bounds both by u16
        let mut slots: FxHashMap<&str, u16> = FxHashMap::default();
        for (idx, (name, _)) in method.params.iter().enumerate() {
            slots.insert(name.as_str(), idx as u16);
        }
        for (idx, (name, pos)) in method.locals.iter().enumerate() {
            let slot = (method.params.len() + idx) as u16;
            if slots.insert(name.as_str(), slot).is_some() {
                self.error(
                    file,
                    *pos,
                    "SB0128",
                    format!("a local or parameter named '{}' is already defined", name),
                );
            }
        }
        let slot_count = method.params.len() + method.locals.len();

        // Labels resolve to instruction indices
        let mut labels: FxHashMap<&str, u32> = FxHashMap::default();
        let mut count = 0u32;
        for stmt in &method.body {
            match stmt {
                Stmt::Label(name, pos) => {
                    if labels.insert(name.as_str(), count).is_some() {
                        self.error(
                            file,
                            *pos,
                            "SB0140",
                            format!("the label '{}' is a duplicate", name),
                        );
                    }
                }
                Stmt::Instr { .. } => count += 1,
            }
        }

        let mut used_slots = FxHashSet::default();
        let mut code = Vec::with_capacity(count as usize);
        let mut lines = Vec::with_capacity(count as usize);

        for stmt in &method.body {
            let (op, operands, pos) = match stmt {
                Stmt::Label(..) => continue,
                Stmt::Instr { op, operands, pos } => (*op, operands, *pos),
            };
            let instr = self.lower_instr(
                decl,
                method,
                file,
                op,
                operands,
                pos,
                &slots,
                slot_count,
                &labels,
                &mut used_slots,
            );
            lines.push(LineEntry {
                instr: code.len() as u32,
                line: pos.line,
                column: pos.column,
            });
            code.push(instr.unwrap_or(Instr::Nop));
        }

        for (idx, (name, pos)) in method.locals.iter().enumerate() {
            let slot = (method.params.len() + idx) as u16;
            if !used_slots.contains(&slot) {
                self.emit(
                    file,
                    *pos,
                    Diagnostic::warning(
                        "SB0168",
                        3,
                        format!("the variable '{}' is declared but never used", name),
                    ),
                );
            }
        }

        (code, lines)
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_instr(
        &mut self,
        decl: &TypeDecl,
        method: &MethodDecl,
        file: usize,
        op: Opcode,
        operands: &[Operand],
        pos: Pos,
        slots: &FxHashMap<&str, u16>,
        slot_count: usize,
        labels: &FxHashMap<&str, u32>,
        used_slots: &mut FxHashSet<u16>,
    ) -> Option<Instr> {
        let ident = |i: usize| match operands.get(i) {
            Some(Operand::Ident(s)) => s.as_str(),
            _ => "",
        };
        let int = |i: usize| match operands.get(i) {
            Some(Operand::Int(v)) => *v,
            _ => 0,
        };
        let argc = int(1).clamp(0, u8::MAX as i64) as u8;

        let instr = match op {
            Opcode::Nop => Instr::Nop,
            Opcode::Pop => Instr::Pop,
            Opcode::Dup => Instr::Dup,
            Opcode::PushNull => Instr::PushNull,
            Opcode::PushTrue => Instr::PushBool(true),
            Opcode::PushFalse => Instr::PushBool(false),
            Opcode::PushInt => Instr::PushInt(int(0)),
            Opcode::PushFloat => match operands.first() {
                Some(Operand::Float(f)) => Instr::PushFloat(*f),
                _ => Instr::PushFloat(0.0),
            },
            Opcode::PushStr => match operands.first() {
                Some(Operand::Str(s)) => Instr::PushStr(self.image.intern(s)),
                _ => Instr::PushStr(self.image.intern("")),
            },
            Opcode::LoadThis => {
                if method.is_static {
                    self.error(file, pos, "SB0026", "'load_this' is not valid in a static method");
                    return None;
                }
                Instr::LoadThis
            }
            Opcode::Load | Opcode::Store => {
                let slot = match operands.first() {
                    Some(Operand::Int(n)) if *n >= 0 && (*n as usize) < slot_count => *n as u16,
                    Some(Operand::Ident(name)) if slots.contains_key(name.as_str()) => {
                        slots[name.as_str()]
                    }
                    other => {
                        let shown = match other {
                            Some(Operand::Int(n)) => n.to_string(),
                            Some(Operand::Ident(s)) => s.clone(),
                            _ => String::new(),
                        };
                        self.error(
                            file,
                            pos,
                            "SB0246",
                            format!("the name '{}' does not exist in the current context", shown),
                        );
                        return None;
                    }
                };
                used_slots.insert(slot);
                if op == Opcode::Load {
                    Instr::Load(slot)
                } else {
                    Instr::Store(slot)
                }
            }
            Opcode::LoadField | Opcode::StoreField => {
                let name = ident(0);
                if method.is_static {
                    self.error(
                        file,
                        pos,
                        "SB0120",
                        format!("an object reference is required to access field '{}'", name),
                    );
                    return None;
                }
                let declared = decl.fields.iter().any(|f| {
                    f.name == name && f.flags & crate::image::field_flags::STATIC == 0
                });
                if !declared {
                    self.error(
                        file,
                        pos,
                        "SB0246",
                        format!("'{}' does not contain an instance field '{}'", decl.name, name),
                    );
                    return None;
                }
                let idx = self.image.intern(name);
                if op == Opcode::LoadField {
                    Instr::LoadField(idx)
                } else {
                    Instr::StoreField(idx)
                }
            }
            Opcode::LoadStatic | Opcode::StoreStatic => {
                let name = ident(0);
                let declared = decl.fields.iter().any(|f| {
                    f.name == name && f.flags & crate::image::field_flags::STATIC != 0
                });
                if !declared {
                    self.error(
                        file,
                        pos,
                        "SB0246",
                        format!("'{}' does not contain a static field '{}'", decl.name, name),
                    );
                    return None;
                }
                let idx = self.image.intern(name);
                if op == Opcode::LoadStatic {
                    Instr::LoadStatic(idx)
                } else {
                    Instr::StoreStatic(idx)
                }
            }
            Opcode::Jmp | Opcode::JmpIf | Opcode::JmpIfNot => {
                let label = ident(0);
                let target = match labels.get(label) {
                    Some(t) => *t,
                    None => {
                        self.error(
                            file,
                            pos,
                            "SB0500",
                            format!("no such label '{}' within the scope of the jump", label),
                        );
                        return None;
                    }
                };
                match op {
                    Opcode::Jmp => Instr::Jmp(target),
                    Opcode::JmpIf => Instr::JmpIf(target),
                    _ => Instr::JmpIfNot(target),
                }
            }
            Opcode::Ret => Instr::Ret,
            Opcode::RetVoid => Instr::RetVoid,
            Opcode::Throw => Instr::Throw,
            Opcode::Add => Instr::Add,
            Opcode::Sub => Instr::Sub,
            Opcode::Mul => Instr::Mul,
            Opcode::Div => Instr::Div,
            Opcode::Rem => Instr::Rem,
            Opcode::Neg => Instr::Neg,
            Opcode::Not => Instr::Not,
            Opcode::Eq => Instr::Eq,
            Opcode::Ne => Instr::Ne,
            Opcode::Lt => Instr::Lt,
            Opcode::Le => Instr::Le,
            Opcode::Gt => Instr::Gt,
            Opcode::Ge => Instr::Ge,
            Opcode::Call => {
                let name = ident(0);
                let candidates: Vec<&MethodDecl> =
                    decl.methods.iter().filter(|m| m.name == name).collect();
                if candidates.is_empty() {
                    self.error(
                        file,
                        pos,
                        "SB0246",
                        format!("'{}' does not contain a method '{}'", decl.name, name),
                    );
                    return None;
                }
                if method.is_static && candidates.iter().all(|m| !m.is_static) {
                    self.error(
                        file,
                        pos,
                        "SB0120",
                        format!("an object reference is required to call '{}'", name),
                    );
                    return None;
                }
                if candidates.iter().all(|m| m.params.len() != argc as usize) {
                    self.error(
                        file,
                        pos,
                        "SB1501",
                        format!("no overload for method '{}' takes {} argument(s)", name, argc),
                    );
                    return None;
                }
                Instr::Call {
                    name: self.image.intern(name),
                    argc,
                }
            }
            Opcode::CallStatic => {
                let type_name = ident(0);
                let name = ident(1);
                let argc = int(2).clamp(0, u8::MAX as i64) as u8;
                let resolved = [qualify(&decl.namespace, type_name), type_name.to_string()]
                    .into_iter()
                    .find_map(|c| self.by_name.get(&c).map(|&e| (c, e)));
                let (full, entry) = match resolved {
                    Some(found) => found,
                    None => {
                        self.error(
                            file,
                            pos,
                            "SB0246",
                            format!("the type '{}' could not be found in this module", type_name),
                        );
                        return None;
                    }
                };
                let target = self.types[entry]
                    .decl
                    .methods
                    .iter()
                    .find(|m| m.name == name && m.is_static)
                    .map(|m| m.params.len());
                match target {
                    None => {
                        self.error(
                            file,
                            pos,
                            "SB0246",
                            format!("'{}' does not contain a static method '{}'", full, name),
                        );
                        return None;
                    }
                    Some(params) if params != argc as usize => {
                        self.error(
                            file,
                            pos,
                            "SB1501",
                            format!("no overload for method '{}' takes {} argument(s)", name, argc),
                        );
                        return None;
                    }
                    Some(_) => {}
                }
                Instr::CallStatic {
                    type_name: self.image.intern(&full),
                    name: self.image.intern(name),
                    argc,
                }
            }
            Opcode::CallExtern => {
                let path = ident(0);
                let (index, param_count) = match self.file_imports[file].get(path) {
                    Some(import) => (import.index, import.param_count),
                    None => {
                        self.error(
                            file,
                            pos,
                            "SB0246",
                            format!("'{}' is not imported", path),
                        );
                        return None;
                    }
                };
                self.used_imports.insert((file, path.to_string()));
                if param_count != argc {
                    self.error(
                        file,
                        pos,
                        "SB1501",
                        format!("'{}' takes {} argument(s), not {}", path, param_count, argc),
                    );
                    return None;
                }
                Instr::CallExtern {
                    import: index,
                    argc,
                }
            }
            Opcode::Raise => {
                let name = ident(0);
                if !decl.events.iter().any(|e| e.name == name) {
                    self.error(
                        file,
                        pos,
                        "SB0246",
                        format!("'{}' does not contain an event '{}'", decl.name, name),
                    );
                    return None;
                }
                Instr::Raise {
                    name: self.image.intern(name),
                    argc,
                }
            }
            Opcode::Yield => {
                if !method.is_sequence {
                    self.error(
                        file,
                        pos,
                        "SB0400",
                        format!("'yield' is only valid in a sequence method ('{}')", method.name),
                    );
                    return None;
                }
                Instr::Yield
            }
        };
        Some(instr)
    }
}

/// Local count as stored in the image, if the method's frame fits the format
///
/// Call sites pass at most `u8::MAX` arguments and slot operands are `u16`.
fn frame_size(method: &MethodDecl) -> Option<u16> {
    u8::try_from(method.params.len()).ok()?;
    u16::try_from(method.params.len() + method.locals.len()).ok()?;
    u16::try_from(method.locals.len()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{ExportedMember, ExportedType};
    use crate::image::{decode_code, FieldType};
    use scriptbox_sdk::Value;

    fn compile(source: &str) -> CompileOutput {
        compile_with(source, &[], CompileOptions::default())
    }

    fn compile_with(source: &str, references: &[Reference], options: CompileOptions) -> CompileOutput {
        AssemblerCompiler::new().compile(&[SourceText::new("t.sbs", source)], references, &options)
    }

    fn codes(output: &CompileOutput) -> Vec<&str> {
        output.diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    fn host_reference() -> Reference {
        Reference {
            name: "host".to_string(),
            types: vec![ExportedType {
                full_name: "Engine.Debug".to_string(),
                kind: TypeKind::Plain,
                members: vec![ExportedMember {
                    name: "log".to_string(),
                    param_count: Some(1),
                }],
            }],
        }
    }

    #[test]
    fn test_compile_full_type() {
        let output = compile_with(
            r#"
            namespace Game
            import host Engine.Debug.log(1)

            pub type Behaviour { }
            interface IDamageable { }

            [replaceable(base = "Behaviour")]
            pub attached type Enemy : Behaviour, IDamageable {
                pub field health: int = 10
                pub field speed: double = 2
                static field count: int

                method damage(amount: int) {
                    load_field health
                    load amount
                    sub
                    store_field health
                    push_str "hit"
                    call_extern Engine.Debug.log 1
                    pop
                    ret_void
                }

                static method spawned(): int {
                    load_static count
                    ret
                }
            }
            "#,
            &[host_reference()],
            CompileOptions {
                generate_symbols: true,
                ..CompileOptions::default()
            },
        );
        assert!(output.success, "{:?}", output.diagnostics);
        assert!(output.symbols.is_some());

        let image = ModuleImage::decode(output.image.as_ref().unwrap()).unwrap();
        assert!(image.has_flag(flags::HAS_SYMBOLS));
        let enemy = image.types.iter().find(|t| t.name == "Enemy").unwrap();
        assert_eq!(enemy.base.as_deref(), Some("Game.Behaviour"));
        assert_eq!(enemy.interfaces, vec!["Game.IDamageable"]);
        assert_eq!(
            enemy.replace.as_ref().unwrap().require_base.as_deref(),
            Some("Game.Behaviour")
        );
        assert_eq!(enemy.fields[1].ty, FieldType::Double);
        assert_eq!(enemy.fields[1].default, Value::Float(2.0));

        let damage = decode_code(&enemy.methods[0].code).unwrap();
        assert_eq!(damage[1], Instr::Load(0));
        assert_eq!(damage[5], Instr::CallExtern { import: 0, argc: 1 });

        let symbols = SymbolImage::decode(output.symbols.as_ref().unwrap()).unwrap();
        let enemy_idx = image.types.iter().position(|t| t.name == "Enemy").unwrap() as u32;
        assert!(symbols.locate(enemy_idx, 0, 2).is_some());
    }

    #[test]
    fn test_semantic_errors() {
        let output = compile(
            r#"
            type A : Missing {
                field x: int
                field x: int
                method m() {
                    jmp nowhere
                    yield
                    load_field y
                }
            }
            "#,
        );
        assert!(!output.success);
        assert!(output.image.is_none());
        let codes = codes(&output);
        for expected in ["SB0246", "SB0103", "SB0500", "SB0400"] {
            assert!(codes.contains(&expected), "missing {} in {:?}", expected, codes);
        }
    }

    #[test]
    fn test_static_and_instance_members_may_share_a_name() {
        let output = compile(
            "type A {\n field x: int = 1\n static field x: int = 2\n method x(): int {\n load_field x\n ret\n }\n static method x(): int {\n load_static x\n ret\n }\n}",
        );
        assert!(output.success, "{:?}", output.diagnostics);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let params: Vec<String> = (0..300).map(|i| format!("p{}: int", i)).collect();
        let source = format!("type A {{\n method m({}) {{\n ret_void\n }}\n}}", params.join(", "));
        let output = compile(&source);
        assert!(!output.success);
        assert!(output.image.is_none());
        assert!(codes(&output).contains(&"SB0235"), "{:?}", codes(&output));

        let params: Vec<String> = (0..255).map(|i| format!("p{}: int", i)).collect();
        let source = format!("type A {{\n method m({}) {{\n ret_void\n }}\n}}", params.join(", "));
        assert!(compile(&source).success);
    }

    #[test]
    fn test_unused_local_warning_respects_level() {
        let source = "type A {\n method m() {\n local unused\n ret_void\n }\n}";
        let output = compile(source);
        assert!(output.success);
        assert_eq!(codes(&output), vec!["SB0168"]);
        assert_eq!(output.diagnostics[0].severity, Severity::Warning);

        let quiet = compile_with(
            source,
            &[],
            CompileOptions {
                warning_level: 2,
                ..CompileOptions::default()
            },
        );
        assert!(quiet.diagnostics.is_empty());
    }

    #[test]
    fn test_unused_import_and_duplicate_reference() {
        let output = compile_with(
            "import host Engine.Debug.log(1)\ntype A { }",
            &[host_reference(), host_reference()],
            CompileOptions::default(),
        );
        assert!(output.success);
        let codes = codes(&output);
        assert!(codes.contains(&"SB0001H"));
        assert!(codes.contains(&"SB1701"));
    }

    #[test]
    fn test_import_requires_reference() {
        let output = compile("import host Engine.Debug.log(1)\ntype A { }");
        assert!(!output.success);
        assert_eq!(output.diagnostics[0].code, "SB0246");
    }

    #[test]
    fn test_unsafe_import() {
        let reference = Reference {
            name: "native".to_string(),
            types: vec![ExportedType {
                full_name: "Sys.Raw".to_string(),
                kind: TypeKind::Plain,
                members: vec![ExportedMember {
                    name: "peek".to_string(),
                    param_count: None,
                }],
            }],
        };
        let source = "import unsafe native Sys.Raw.peek(1)\ntype A {\n static method m() {\n push_int 0\n call_extern Sys.Raw.peek 1\n ret\n }\n}";

        let denied = compile_with(source, &[reference.clone()], CompileOptions::default());
        assert!(codes(&denied).contains(&"SB0227"));

        let allowed = compile_with(
            source,
            &[reference],
            CompileOptions {
                allow_unsafe: true,
                ..CompileOptions::default()
            },
        );
        assert!(allowed.success, "{:?}", allowed.diagnostics);
        let image = ModuleImage::decode(allowed.image.as_ref().unwrap()).unwrap();
        assert!(image.has_flag(flags::ALLOW_UNSAFE));
    }

    #[test]
    fn test_define_symbols() {
        let source = "type A {\n#if DEBUG\n field debug: int\n#endif\n}";
        let off = compile(source);
        let on = compile_with(
            source,
            &[],
            CompileOptions {
                define_symbols: vec!["DEBUG".to_string()],
                ..CompileOptions::default()
            },
        );
        let fields = |o: &CompileOutput| {
            ModuleImage::decode(o.image.as_ref().unwrap()).unwrap().types[0]
                .fields
                .len()
        };
        assert_eq!(fields(&off), 0);
        assert_eq!(fields(&on), 1);
    }

    #[test]
    fn test_nested_types_are_linked() {
        let output = compile("namespace N\ntype Outer {\n type Inner { }\n}");
        let image = ModuleImage::decode(output.image.as_ref().unwrap()).unwrap();
        assert_eq!(image.types[1].full_name(), "N.Outer.Inner");
        assert_eq!(image.types[1].parent, Some(0));
    }

    #[test]
    fn test_empty_source_produces_empty_module() {
        let output = compile("// nothing here");
        assert!(output.success);
        let image = ModuleImage::decode(output.image.as_ref().unwrap()).unwrap();
        assert!(image.types.is_empty());
    }
}
