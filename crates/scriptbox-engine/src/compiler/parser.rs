//! Parser for `.sbs` assembler sources
//!
//! Produces an unresolved syntax tree. Names, labels and slots are resolved
//! by the assembler.
//!
//! ```text
//! namespace Game
//! import host Engine.Debug.log(1)
//!
//! [replaceable(name = "Enemy")]
//! pub attached type Enemy : Behaviour {
//!     pub field health: int = 10
//!     method damage(amount: int) {
//!         load_field health
//!         load amount
//!         sub
//!         store_field health
//!         ret_void
//!     }
//! }
//! ```

use super::lexer::{Spanned, Token};
use super::Diagnostic;
use crate::image::{field_flags, Attribute, FieldType, Opcode, ReplaceInfo, TypeKind};
use scriptbox_sdk::Value;

/// Source position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    /// Line (1-indexed)
    pub line: u32,
    /// Column (1-indexed)
    pub column: u32,
}

/// A parsed source file
#[derive(Debug, Clone, Default)]
pub struct SourceFile {
    /// Path the file was compiled from
    pub path: String,
    /// Import declarations
    pub imports: Vec<ImportDecl>,
    /// Top-level types
    pub types: Vec<TypeDecl>,
}

/// `import [unsafe] <library> <Namespace.Type.member>(<argc>)`
#[derive(Debug, Clone)]
pub struct ImportDecl {
    /// Library name
    pub library: String,
    /// Dotted member path
    pub path: String,
    /// Argument count
    pub param_count: u8,
    /// Declared `unsafe`
    pub is_unsafe: bool,
    /// Position
    pub pos: Pos,
}

/// Type declaration
#[derive(Debug, Clone)]
pub struct TypeDecl {
    /// Namespace in effect at the declaration
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Category
    pub kind: TypeKind,
    /// `pub`
    pub is_public: bool,
    /// Names after `:` (base and interfaces, unresolved)
    pub supertypes: Vec<(String, Pos)>,
    /// Free-form attributes
    pub attributes: Vec<Attribute>,
    /// `[replaceable(...)]`
    pub replace: Option<ReplaceInfo>,
    /// Fields
    pub fields: Vec<FieldDecl>,
    /// Properties
    pub properties: Vec<PropertyDecl>,
    /// Methods
    pub methods: Vec<MethodDecl>,
    /// Events
    pub events: Vec<EventDecl>,
    /// Nested types
    pub nested: Vec<TypeDecl>,
    /// Position
    pub pos: Pos,
}

/// Field declaration
#[derive(Debug, Clone)]
pub struct FieldDecl {
    /// Name
    pub name: String,
    /// Declared type
    pub ty: FieldType,
    /// Flag bits
    pub flags: u8,
    /// Initializer
    pub default: Option<Value>,
    /// Position
    pub pos: Pos,
}

/// Property declaration
#[derive(Debug, Clone)]
pub struct PropertyDecl {
    /// Name
    pub name: String,
    /// Declared type
    pub ty: FieldType,
    /// `static`
    pub is_static: bool,
    /// Getter method
    pub getter: Option<String>,
    /// Setter method
    pub setter: Option<String>,
    /// Position
    pub pos: Pos,
}

/// Event declaration
#[derive(Debug, Clone)]
pub struct EventDecl {
    /// Name
    pub name: String,
    /// `static`
    pub is_static: bool,
    /// Position
    pub pos: Pos,
}

/// Method declaration
#[derive(Debug, Clone)]
pub struct MethodDecl {
    /// Name
    pub name: String,
    /// `static`
    pub is_static: bool,
    /// `sequence`
    pub is_sequence: bool,
    /// Parameters
    pub params: Vec<(String, FieldType)>,
    /// Return type
    pub returns: Option<FieldType>,
    /// Declared locals
    pub locals: Vec<(String, Pos)>,
    /// Body
    pub body: Vec<Stmt>,
    /// Position
    pub pos: Pos,
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Name
    Ident(String),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    Str(String),
}

/// Body statement
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `name:`
    Label(String, Pos),
    /// Instruction with raw operands
    Instr {
        /// Opcode
        op: Opcode,
        /// Operands in source order
        operands: Vec<Operand>,
        /// Position
        pos: Pos,
    },
}

/// Operand shapes per opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    None,
    Int,
    Number,
    Str,
    Slot,
    Name,
    NameArgc,
    TypeNameArgc,
}

fn shape_of(op: Opcode) -> Shape {
    match op {
        Opcode::PushInt => Shape::Int,
        Opcode::PushFloat => Shape::Number,
        Opcode::PushStr => Shape::Str,
        Opcode::Load | Opcode::Store => Shape::Slot,
        Opcode::LoadField
        | Opcode::StoreField
        | Opcode::LoadStatic
        | Opcode::StoreStatic
        | Opcode::Jmp
        | Opcode::JmpIf
        | Opcode::JmpIfNot => Shape::Name,
        Opcode::Call | Opcode::CallExtern | Opcode::Raise => Shape::NameArgc,
        Opcode::CallStatic => Shape::TypeNameArgc,
        _ => Shape::None,
    }
}

/// Marker for an error that has already been reported
struct Reported;

type PResult<T> = Result<T, Reported>;

const MEMBER_KEYWORDS: &[&str] = &[
    "pub",
    "static",
    "serialized",
    "nonserialized",
    "field",
    "property",
    "event",
    "method",
    "sequence",
    "type",
    "attached",
    "interface",
];

/// Recursive-descent parser over a token stream
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    file: String,
    namespace: String,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    /// Create a parser
    pub fn new(tokens: Vec<Spanned>, file: impl Into<String>) -> Self {
        Self {
            tokens,
            pos: 0,
            file: file.into(),
            namespace: String::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Parse a whole file
    pub fn parse(mut self) -> (SourceFile, Vec<Diagnostic>) {
        let mut file = SourceFile {
            path: self.file.clone(),
            ..SourceFile::default()
        };

        while !self.at_end() {
            let result = if self.check_ident("namespace") {
                self.parse_namespace()
            } else if self.check_ident("import") {
                self.parse_import().map(|i| file.imports.push(i))
            } else {
                self.parse_type().map(|t| file.types.push(t))
            };
            if result.is_err() {
                self.recover_top_level();
            }
        }

        (file, self.diagnostics)
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn current_pos(&self) -> Pos {
        match self.tokens.get(self.pos).or_else(|| self.tokens.last()) {
            Some(s) => Pos {
                line: s.line,
                column: s.column,
            },
            None => Pos { line: 1, column: 1 },
        }
    }

    fn line_of(&self, idx: usize) -> Option<u32> {
        self.tokens.get(idx).map(|s| s.line)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn check_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == word)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.check_ident(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&mut self, message: impl Into<String>) -> Reported {
        let pos = self.current_pos();
        let message = match self.peek() {
            Some(token) => format!("{}, found {}", message.into(), token.describe()),
            None => format!("{}, found end of file", message.into()),
        };
        self.diagnostics
            .push(Diagnostic::error("SB0002", message).at(&self.file, pos.line, pos.column));
        Reported
    }

    fn report(&mut self, code: &str, message: impl Into<String>, pos: Pos) {
        self.diagnostics
            .push(Diagnostic::error(code, message).at(&self.file, pos.line, pos.column));
    }

    fn expect(&mut self, token: Token) -> PResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected {}", token.describe())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<String> {
        match self.peek() {
            Some(Token::Ident(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.error_here(format!("expected {}", what))),
        }
    }

    fn expect_int(&mut self, what: &str) -> PResult<i64> {
        match self.peek() {
            Some(Token::Int(i)) => {
                let i = *i;
                self.pos += 1;
                Ok(i)
            }
            _ => Err(self.error_here(format!("expected {}", what))),
        }
    }

    fn expect_str(&mut self, what: &str) -> PResult<String> {
        match self.peek() {
            Some(Token::Str(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.error_here(format!("expected {}", what))),
        }
    }

    fn expect_field_type(&mut self) -> PResult<FieldType> {
        let pos = self.current_pos();
        let name = self.expect_ident("type name")?;
        match FieldType::from_name(&name) {
            Some(ty) => Ok(ty),
            None => {
                self.report("SB0246", format!("unknown type '{}'", name), pos);
                Err(Reported)
            }
        }
    }

    fn expect_argc(&mut self) -> PResult<u8> {
        let pos = self.current_pos();
        let argc = self.expect_int("argument count")?;
        u8::try_from(argc).map_err(|_| {
            self.report("SB0002", format!("argument count {} out of range", argc), pos);
            Reported
        })
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    fn recover_top_level(&mut self) {
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token {
                Token::LeftBrace => depth += 1,
                Token::RightBrace => {
                    if depth <= 1 {
                        self.pos += 1;
                        return;
                    }
                    depth -= 1;
                }
                Token::Ident(s)
                    if depth == 0
                        && matches!(s.as_str(), "namespace" | "import" | "type" | "attached" | "interface" | "pub") =>
                {
                    return;
                }
                Token::LeftBracket if depth == 0 => return,
                _ => {}
            }
            self.pos += 1;
        }
    }

    // Skip to the next member keyword or the closing brace of the type
    fn recover_member(&mut self) {
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token {
                Token::LeftBrace => depth += 1,
                Token::RightBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    if depth == 0 {
                        self.pos += 1;
                        return;
                    }
                }
                Token::LeftBracket if depth == 0 => return,
                Token::Ident(s) if depth == 0 && MEMBER_KEYWORDS.contains(&s.as_str()) => return,
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn skip_line(&mut self, line: u32) {
        while self.line_of(self.pos) == Some(line) && !self.check(&Token::RightBrace) {
            self.pos += 1;
        }
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn parse_namespace(&mut self) -> PResult<()> {
        self.pos += 1;
        self.namespace = self.expect_ident("namespace name")?;
        Ok(())
    }

    fn parse_import(&mut self) -> PResult<ImportDecl> {
        let pos = self.current_pos();
        self.pos += 1;
        let is_unsafe = self.eat_ident("unsafe");
        let library = self.expect_ident("library name")?;
        let path = self.expect_ident("member path")?;
        if path.split('.').count() < 2 {
            self.report(
                "SB0002",
                format!("import path '{}' must name a type and a member", path),
                pos,
            );
            return Err(Reported);
        }
        self.expect(Token::LeftParen)?;
        let param_count = self.expect_argc()?;
        self.expect(Token::RightParen)?;
        Ok(ImportDecl {
            library,
            path,
            param_count,
            is_unsafe,
            pos,
        })
    }

    fn parse_attribute_block(
        &mut self,
        attributes: &mut Vec<Attribute>,
        replace: &mut Option<ReplaceInfo>,
    ) -> PResult<()> {
        while self.eat(&Token::LeftBracket) {
            let name = self.expect_ident("attribute name")?;
            let mut args = Vec::new();
            if self.eat(&Token::LeftParen) {
                while !self.check(&Token::RightParen) {
                    let key = self.expect_ident("argument name")?;
                    self.expect(Token::Equal)?;
                    let value = self.expect_str("string value")?;
                    args.push((key, value));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RightParen)?;
            }
            self.expect(Token::RightBracket)?;

            let attribute = Attribute { name, args };
            if attribute.name == "replaceable" {
                *replace = Some(ReplaceInfo {
                    replace_name: attribute.arg("name").map(str::to_string),
                    require_base: attribute.arg("base").map(str::to_string),
                    require_interfaces: attribute
                        .arg("interfaces")
                        .map(|list| {
                            list.split(',')
                                .map(str::trim)
                                .filter(|s| !s.is_empty())
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                });
            } else {
                attributes.push(attribute);
            }
        }
        Ok(())
    }

    fn parse_type(&mut self) -> PResult<TypeDecl> {
        let mut attributes = Vec::new();
        let mut replace = None;
        self.parse_attribute_block(&mut attributes, &mut replace)?;
        self.parse_type_header(attributes, replace)
    }

    fn parse_type_header(
        &mut self,
        attributes: Vec<Attribute>,
        replace: Option<ReplaceInfo>,
    ) -> PResult<TypeDecl> {
        let pos = self.current_pos();
        let is_public = self.eat_ident("pub");
        let kind = if self.eat_ident("interface") {
            TypeKind::Interface
        } else if self.eat_ident("attached") {
            if !self.eat_ident("type") {
                return Err(self.error_here("expected 'type' after 'attached'"));
            }
            TypeKind::Attached
        } else if self.eat_ident("type") {
            TypeKind::Plain
        } else {
            return Err(self.error_here("expected a type declaration"));
        };

        let name = self.expect_ident("type name")?;
        if name.contains('.') {
            self.report("SB0002", format!("type name '{}' cannot be dotted", name), pos);
        }

        let mut supertypes = Vec::new();
        if self.eat(&Token::Colon) {
            loop {
                let at = self.current_pos();
                supertypes.push((self.expect_ident("base type or interface")?, at));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        let mut decl = TypeDecl {
            namespace: self.namespace.clone(),
            name,
            kind,
            is_public,
            supertypes,
            attributes,
            replace,
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            events: Vec::new(),
            nested: Vec::new(),
            pos,
        };

        self.expect(Token::LeftBrace)?;
        while !self.check(&Token::RightBrace) {
            if self.at_end() {
                return Err(self.error_here("expected '}'"));
            }
            if self.parse_member(&mut decl).is_err() {
                self.recover_member();
            }
        }
        self.expect(Token::RightBrace)?;
        Ok(decl)
    }

    fn parse_member(&mut self, decl: &mut TypeDecl) -> PResult<()> {
        if self.check(&Token::LeftBracket) {
            let nested = self.parse_type()?;
            decl.nested.push(nested);
            return Ok(());
        }

        // Nested type headers start with these words
        let is_nested = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Ident(a)), _) if a == "type" || a == "attached" || a == "interface" => true,
            (Some(Token::Ident(a)), Some(Token::Ident(b)))
                if a == "pub" && matches!(b.as_str(), "type" | "attached" | "interface") =>
            {
                true
            }
            _ => false,
        };
        if is_nested {
            let nested = self.parse_type_header(Vec::new(), None)?;
            decl.nested.push(nested);
            return Ok(());
        }

        let pos = self.current_pos();
        let mut flags = 0u8;
        let mut is_sequence = false;
        loop {
            if self.eat_ident("pub") {
                flags |= field_flags::PUBLIC;
            } else if self.eat_ident("static") {
                flags |= field_flags::STATIC;
            } else if self.eat_ident("serialized") {
                flags |= field_flags::SERIALIZED;
            } else if self.eat_ident("nonserialized") {
                flags |= field_flags::NON_SERIALIZED;
            } else if self.eat_ident("sequence") {
                is_sequence = true;
            } else {
                break;
            }
        }
        let is_static = flags & field_flags::STATIC != 0;

        if self.eat_ident("field") {
            let name = self.expect_ident("field name")?;
            self.expect(Token::Colon)?;
            let ty = self.expect_field_type()?;
            let default = if self.eat(&Token::Equal) {
                Some(self.parse_literal()?)
            } else {
                None
            };
            decl.fields.push(FieldDecl {
                name,
                ty,
                flags,
                default,
                pos,
            });
        } else if self.eat_ident("property") {
            let name = self.expect_ident("property name")?;
            self.expect(Token::Colon)?;
            let ty = self.expect_field_type()?;
            let mut getter = None;
            let mut setter = None;
            loop {
                if self.eat_ident("get") {
                    getter = Some(self.expect_ident("getter method")?);
                } else if self.eat_ident("set") {
                    setter = Some(self.expect_ident("setter method")?);
                } else {
                    break;
                }
            }
            decl.properties.push(PropertyDecl {
                name,
                ty,
                is_static,
                getter,
                setter,
                pos,
            });
        } else if self.eat_ident("event") {
            let name = self.expect_ident("event name")?;
            decl.events.push(EventDecl {
                name,
                is_static,
                pos,
            });
        } else if self.eat_ident("method") {
            let method = self.parse_method(is_static, is_sequence, pos)?;
            decl.methods.push(method);
        } else {
            return Err(self.error_here("expected a member declaration"));
        }
        Ok(())
    }

    fn parse_literal(&mut self) -> PResult<Value> {
        let value = match self.peek() {
            Some(Token::Int(i)) => Value::Int(*i),
            Some(Token::Float(f)) => Value::Float(*f),
            Some(Token::Str(s)) => Value::str(s.as_str()),
            Some(Token::Ident(s)) if s == "true" => Value::Bool(true),
            Some(Token::Ident(s)) if s == "false" => Value::Bool(false),
            Some(Token::Ident(s)) if s == "null" => Value::Null,
            _ => return Err(self.error_here("expected a literal")),
        };
        self.pos += 1;
        Ok(value)
    }

    fn parse_method(&mut self, is_static: bool, is_sequence: bool, pos: Pos) -> PResult<MethodDecl> {
        let name = self.expect_ident("method name")?;
        self.expect(Token::LeftParen)?;
        let mut params = Vec::new();
        while !self.check(&Token::RightParen) {
            let param = self.expect_ident("parameter name")?;
            self.expect(Token::Colon)?;
            let ty = self.expect_field_type()?;
            params.push((param, ty));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RightParen)?;
        let returns = if self.eat(&Token::Colon) {
            Some(self.expect_field_type()?)
        } else {
            None
        };

        self.expect(Token::LeftBrace)?;
        let mut locals = Vec::new();
        let mut body = Vec::new();
        while !self.check(&Token::RightBrace) {
            if self.at_end() {
                return Err(self.error_here("expected '}'"));
            }
            let line = self.current_pos().line;
            if self.parse_statement(&mut locals, &mut body).is_err() {
                self.skip_line(line);
            }
        }
        self.expect(Token::RightBrace)?;

        Ok(MethodDecl {
            name,
            is_static,
            is_sequence,
            params,
            returns,
            locals,
            body,
            pos,
        })
    }

    fn parse_statement(&mut self, locals: &mut Vec<(String, Pos)>, body: &mut Vec<Stmt>) -> PResult<()> {
        let pos = self.current_pos();
        let word = self.expect_ident("instruction")?;

        if self.eat(&Token::Colon) {
            body.push(Stmt::Label(word, pos));
            return Ok(());
        }
        if word == "local" {
            let at = self.current_pos();
            let name = self.expect_ident("local name")?;
            locals.push((name, at));
            return Ok(());
        }

        let op = match Opcode::from_mnemonic(&word) {
            Some(op) => op,
            None => {
                self.report("SB0002", format!("unknown instruction '{}'", word), pos);
                return Err(Reported);
            }
        };

        let operands = match shape_of(op) {
            Shape::None => Vec::new(),
            Shape::Int => vec![Operand::Int(self.expect_int("integer operand")?)],
            Shape::Number => match self.peek().cloned() {
                Some(Token::Int(i)) => {
                    self.pos += 1;
                    vec![Operand::Float(i as f64)]
                }
                Some(Token::Float(f)) => {
                    self.pos += 1;
                    vec![Operand::Float(f)]
                }
                _ => return Err(self.error_here("expected number operand")),
            },
            Shape::Str => vec![Operand::Str(self.expect_str("string operand")?)],
            Shape::Slot => match self.peek().cloned() {
                Some(Token::Int(i)) => {
                    self.pos += 1;
                    vec![Operand::Int(i)]
                }
                Some(Token::Ident(s)) => {
                    self.pos += 1;
                    vec![Operand::Ident(s)]
                }
                _ => return Err(self.error_here("expected local name or slot")),
            },
            Shape::Name => vec![Operand::Ident(self.expect_ident("name operand")?)],
            Shape::NameArgc => vec![
                Operand::Ident(self.expect_ident("name operand")?),
                Operand::Int(self.expect_argc()? as i64),
            ],
            Shape::TypeNameArgc => vec![
                Operand::Ident(self.expect_ident("type operand")?),
                Operand::Ident(self.expect_ident("method operand")?),
                Operand::Int(self.expect_argc()? as i64),
            ],
        };

        body.push(Stmt::Instr { op, operands, pos });
        Ok(())
    }
}

/// Parse a token stream
pub fn parse(tokens: Vec<Spanned>, file: &str) -> (SourceFile, Vec<Diagnostic>) {
    Parser::new(tokens, file).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::tokenize;

    fn parse_ok(source: &str) -> SourceFile {
        let (tokens, lex) = tokenize(source, "t.sbs");
        assert!(lex.is_empty());
        let (file, diags) = parse(tokens, "t.sbs");
        assert!(diags.is_empty(), "{:?}", diags);
        file
    }

    #[test]
    fn test_parse_type_with_members() {
        let file = parse_ok(
            r#"
            namespace Game
            import host Engine.Debug.log(1)

            [Category(name = "enemies")]
            [replaceable(base = "Game.Behaviour", interfaces = "Game.IA, Game.IB")]
            pub attached type Enemy : Behaviour, IA {
                pub field health: int = 10
                serialized nonserialized field secret: string
                static field count: int = 0
                property Health: int get get_health set set_health
                static event Spawned

                method get_health(): int {
                    load_field health
                    ret
                }

                sequence method blink(times: int) {
                    local left
                  top:
                    load times
                    jmp_ifnot done
                    yield
                    jmp top
                  done:
                    ret_void
                }

                type Inner {
                }
            }
            "#,
        );

        assert_eq!(file.imports.len(), 1);
        assert_eq!(file.imports[0].path, "Engine.Debug.log");
        assert_eq!(file.imports[0].param_count, 1);

        let ty = &file.types[0];
        assert_eq!(ty.namespace, "Game");
        assert_eq!(ty.kind, TypeKind::Attached);
        assert!(ty.is_public);
        assert_eq!(ty.supertypes.len(), 2);
        assert_eq!(ty.attributes[0].arg("name"), Some("enemies"));
        let replace = ty.replace.as_ref().unwrap();
        assert_eq!(replace.require_base.as_deref(), Some("Game.Behaviour"));
        assert_eq!(replace.require_interfaces, vec!["Game.IA", "Game.IB"]);

        assert_eq!(ty.fields.len(), 3);
        assert_eq!(ty.fields[0].default, Some(Value::Int(10)));
        assert_eq!(
            ty.fields[1].flags,
            field_flags::SERIALIZED | field_flags::NON_SERIALIZED
        );
        assert_eq!(ty.fields[2].flags, field_flags::STATIC);
        assert_eq!(ty.properties[0].setter.as_deref(), Some("set_health"));
        assert!(ty.events[0].is_static);

        let blink = &ty.methods[1];
        assert!(blink.is_sequence);
        assert_eq!(blink.locals.len(), 1);
        assert!(matches!(&blink.body[0], Stmt::Label(l, _) if l == "top"));
        assert_eq!(ty.nested[0].name, "Inner");
    }

    #[test]
    fn test_syntax_error_recovers_to_next_member() {
        let (tokens, _) = tokenize(
            "type A {\n field : int\n field ok: int\n method m() {\n bogus 1\n ret_void\n }\n}",
            "t.sbs",
        );
        let (file, diags) = parse(tokens, "t.sbs");
        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.code == "SB0002"));
        assert_eq!(file.types[0].fields.len(), 1);
        assert_eq!(file.types[0].methods[0].body.len(), 1);
    }

    #[test]
    fn test_unknown_field_type() {
        let (tokens, _) = tokenize("type A { field x: vector }", "t.sbs");
        let (_, diags) = parse(tokens, "t.sbs");
        assert_eq!(diags[0].code, "SB0246");
    }
}
