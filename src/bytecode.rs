//! Opcode mnemonics of the JVM instruction set and their decoding from
//! raw bytecode bytes.
//! ref: https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-6.html
use std::fmt;

/// Every opcode the dispatch loop understands. `Unknown` carries the raw
/// byte of anything outside the instruction set so failures can name it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OPCode {
    Nop,
    AconstNull,
    IconstM1,
    Iconst0,
    Iconst1,
    Iconst2,
    Iconst3,
    Iconst4,
    Iconst5,
    Lconst0,
    Lconst1,
    Fconst0,
    Fconst1,
    Fconst2,
    Dconst0,
    Dconst1,
    Bipush,
    Sipush,
    Ldc,
    LdcW,
    Ldc2W,
    Iload,
    Lload,
    Fload,
    Dload,
    Aload,
    Iload0,
    Iload1,
    Iload2,
    Iload3,
    Lload0,
    Lload1,
    Lload2,
    Lload3,
    Fload0,
    Fload1,
    Fload2,
    Fload3,
    Dload0,
    Dload1,
    Dload2,
    Dload3,
    Aload0,
    Aload1,
    Aload2,
    Aload3,
    Iaload,
    Laload,
    Faload,
    Daload,
    Aaload,
    Baload,
    Caload,
    Saload,
    Istore,
    Lstore,
    Fstore,
    Dstore,
    Astore,
    Istore0,
    Istore1,
    Istore2,
    Istore3,
    Lstore0,
    Lstore1,
    Lstore2,
    Lstore3,
    Fstore0,
    Fstore1,
    Fstore2,
    Fstore3,
    Dstore0,
    Dstore1,
    Dstore2,
    Dstore3,
    Astore0,
    Astore1,
    Astore2,
    Astore3,
    Iastore,
    Lastore,
    Fastore,
    Dastore,
    Aastore,
    Bastore,
    Castore,
    Sastore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    Iadd,
    Ladd,
    Fadd,
    Dadd,
    Isub,
    Lsub,
    Fsub,
    Dsub,
    Imul,
    Lmul,
    Fmul,
    Dmul,
    Idiv,
    Ldiv,
    Fdiv,
    Ddiv,
    Irem,
    Lrem,
    Frem,
    Drem,
    Ineg,
    Lneg,
    Fneg,
    Dneg,
    Ishl,
    Lshl,
    Ishr,
    Lshr,
    Iushr,
    Lushr,
    Iand,
    Land,
    Ior,
    Lor,
    Ixor,
    Lxor,
    Iinc,
    I2l,
    I2f,
    I2d,
    L2i,
    L2f,
    L2d,
    F2i,
    F2l,
    F2d,
    D2i,
    D2l,
    D2f,
    I2b,
    I2c,
    I2s,
    Lcmp,
    Fcmpl,
    Fcmpg,
    Dcmpl,
    Dcmpg,
    Ifeq,
    Ifne,
    Iflt,
    Ifge,
    Ifgt,
    Ifle,
    IfIcmpeq,
    IfIcmpne,
    IfIcmplt,
    IfIcmpge,
    IfIcmpgt,
    IfIcmple,
    IfAcmpeq,
    IfAcmpne,
    Goto,
    Jsr,
    Ret,
    Tableswitch,
    Lookupswitch,
    Ireturn,
    Lreturn,
    Freturn,
    Dreturn,
    Areturn,
    Return,
    Getstatic,
    Putstatic,
    Getfield,
    Putfield,
    Invokevirtual,
    Invokespecial,
    Invokestatic,
    Invokeinterface,
    Invokedynamic,
    New,
    Newarray,
    Anewarray,
    Arraylength,
    Athrow,
    Checkcast,
    Instanceof,
    Monitorenter,
    Monitorexit,
    Wide,
    Multianewarray,
    Ifnull,
    Ifnonnull,
    GotoW,
    JsrW,
    Breakpoint,
    Unknown(u8),
}

impl fmt::Display for OPCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unknown(byte) => write!(f, "unknown(0x{byte:02X})"),
            other => write!(f, "{other:?}"),
        }
    }
}

// Bytecode arrives as `Vec<u8>`; the dispatch loop converts byte by byte.
impl From<u8> for OPCode {
    fn from(byte: u8) -> Self {
        match byte {
            0 => Self::Nop,
            1 => Self::AconstNull,
            2 => Self::IconstM1,
            3 => Self::Iconst0,
            4 => Self::Iconst1,
            5 => Self::Iconst2,
            6 => Self::Iconst3,
            7 => Self::Iconst4,
            8 => Self::Iconst5,
            9 => Self::Lconst0,
            10 => Self::Lconst1,
            11 => Self::Fconst0,
            12 => Self::Fconst1,
            13 => Self::Fconst2,
            14 => Self::Dconst0,
            15 => Self::Dconst1,
            16 => Self::Bipush,
            17 => Self::Sipush,
            18 => Self::Ldc,
            19 => Self::LdcW,
            20 => Self::Ldc2W,
            21 => Self::Iload,
            22 => Self::Lload,
            23 => Self::Fload,
            24 => Self::Dload,
            25 => Self::Aload,
            26 => Self::Iload0,
            27 => Self::Iload1,
            28 => Self::Iload2,
            29 => Self::Iload3,
            30 => Self::Lload0,
            31 => Self::Lload1,
            32 => Self::Lload2,
            33 => Self::Lload3,
            34 => Self::Fload0,
            35 => Self::Fload1,
            36 => Self::Fload2,
            37 => Self::Fload3,
            38 => Self::Dload0,
            39 => Self::Dload1,
            40 => Self::Dload2,
            41 => Self::Dload3,
            42 => Self::Aload0,
            43 => Self::Aload1,
            44 => Self::Aload2,
            45 => Self::Aload3,
            46 => Self::Iaload,
            47 => Self::Laload,
            48 => Self::Faload,
            49 => Self::Daload,
            50 => Self::Aaload,
            51 => Self::Baload,
            52 => Self::Caload,
            53 => Self::Saload,
            54 => Self::Istore,
            55 => Self::Lstore,
            56 => Self::Fstore,
            57 => Self::Dstore,
            58 => Self::Astore,
            59 => Self::Istore0,
            60 => Self::Istore1,
            61 => Self::Istore2,
            62 => Self::Istore3,
            63 => Self::Lstore0,
            64 => Self::Lstore1,
            65 => Self::Lstore2,
            66 => Self::Lstore3,
            67 => Self::Fstore0,
            68 => Self::Fstore1,
            69 => Self::Fstore2,
            70 => Self::Fstore3,
            71 => Self::Dstore0,
            72 => Self::Dstore1,
            73 => Self::Dstore2,
            74 => Self::Dstore3,
            75 => Self::Astore0,
            76 => Self::Astore1,
            77 => Self::Astore2,
            78 => Self::Astore3,
            79 => Self::Iastore,
            80 => Self::Lastore,
            81 => Self::Fastore,
            82 => Self::Dastore,
            83 => Self::Aastore,
            84 => Self::Bastore,
            85 => Self::Castore,
            86 => Self::Sastore,
            87 => Self::Pop,
            88 => Self::Pop2,
            89 => Self::Dup,
            90 => Self::DupX1,
            91 => Self::DupX2,
            92 => Self::Dup2,
            93 => Self::Dup2X1,
            94 => Self::Dup2X2,
            95 => Self::Swap,
            96 => Self::Iadd,
            97 => Self::Ladd,
            98 => Self::Fadd,
            99 => Self::Dadd,
            100 => Self::Isub,
            101 => Self::Lsub,
            102 => Self::Fsub,
            103 => Self::Dsub,
            104 => Self::Imul,
            105 => Self::Lmul,
            106 => Self::Fmul,
            107 => Self::Dmul,
            108 => Self::Idiv,
            109 => Self::Ldiv,
            110 => Self::Fdiv,
            111 => Self::Ddiv,
            112 => Self::Irem,
            113 => Self::Lrem,
            114 => Self::Frem,
            115 => Self::Drem,
            116 => Self::Ineg,
            117 => Self::Lneg,
            118 => Self::Fneg,
            119 => Self::Dneg,
            120 => Self::Ishl,
            121 => Self::Lshl,
            122 => Self::Ishr,
            123 => Self::Lshr,
            124 => Self::Iushr,
            125 => Self::Lushr,
            126 => Self::Iand,
            127 => Self::Land,
            128 => Self::Ior,
            129 => Self::Lor,
            130 => Self::Ixor,
            131 => Self::Lxor,
            132 => Self::Iinc,
            133 => Self::I2l,
            134 => Self::I2f,
            135 => Self::I2d,
            136 => Self::L2i,
            137 => Self::L2f,
            138 => Self::L2d,
            139 => Self::F2i,
            140 => Self::F2l,
            141 => Self::F2d,
            142 => Self::D2i,
            143 => Self::D2l,
            144 => Self::D2f,
            145 => Self::I2b,
            146 => Self::I2c,
            147 => Self::I2s,
            148 => Self::Lcmp,
            149 => Self::Fcmpl,
            150 => Self::Fcmpg,
            151 => Self::Dcmpl,
            152 => Self::Dcmpg,
            153 => Self::Ifeq,
            154 => Self::Ifne,
            155 => Self::Iflt,
            156 => Self::Ifge,
            157 => Self::Ifgt,
            158 => Self::Ifle,
            159 => Self::IfIcmpeq,
            160 => Self::IfIcmpne,
            161 => Self::IfIcmplt,
            162 => Self::IfIcmpge,
            163 => Self::IfIcmpgt,
            164 => Self::IfIcmple,
            165 => Self::IfAcmpeq,
            166 => Self::IfAcmpne,
            167 => Self::Goto,
            168 => Self::Jsr,
            169 => Self::Ret,
            170 => Self::Tableswitch,
            171 => Self::Lookupswitch,
            172 => Self::Ireturn,
            173 => Self::Lreturn,
            174 => Self::Freturn,
            175 => Self::Dreturn,
            176 => Self::Areturn,
            177 => Self::Return,
            178 => Self::Getstatic,
            179 => Self::Putstatic,
            180 => Self::Getfield,
            181 => Self::Putfield,
            182 => Self::Invokevirtual,
            183 => Self::Invokespecial,
            184 => Self::Invokestatic,
            185 => Self::Invokeinterface,
            186 => Self::Invokedynamic,
            187 => Self::New,
            188 => Self::Newarray,
            189 => Self::Anewarray,
            190 => Self::Arraylength,
            191 => Self::Athrow,
            192 => Self::Checkcast,
            193 => Self::Instanceof,
            194 => Self::Monitorenter,
            195 => Self::Monitorexit,
            196 => Self::Wide,
            197 => Self::Multianewarray,
            198 => Self::Ifnull,
            199 => Self::Ifnonnull,
            200 => Self::GotoW,
            201 => Self::JsrW,
            202 => Self::Breakpoint,
            203..=u8::MAX => Self::Unknown(byte),
        }
    }
}
